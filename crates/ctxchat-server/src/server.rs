//! Core server: accepts WebSocket connections and feeds the event loop.
//!
//! Each connection runs in its own task that forwards inbound frames to the
//! single event-loop thread and writes whatever the loop queues for it.

use crate::config::ServerConfig;
use crate::events::{EventLoop, Outbound, ServerEvent, OUTBOUND_QUEUE};
use crate::transport::websocket::{self, Inbound, WebSocketConnection};
use ctxchat_core::{ChatError, ChatResult, SessionId};
use std::future::Future;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

/// The chat server instance.
pub struct ChatServer {
    config: ServerConfig,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> ChatResult<()>
    where
        F: Future<Output = ()>,
    {
        let (addr, listener) = websocket::start_listener(self.config.bind_addr()?).await?;
        info!(
            addr = %addr,
            protocol = %self.config.protocol,
            "ctxchat-server ready"
        );
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already started listener.
    ///
    /// Stops when `shutdown` resolves or the listener closes. Every open
    /// session is then closed with code 1001 before this returns.
    pub async fn serve<F>(
        self,
        mut listener: mpsc::Receiver<WebSocketConnection>,
        shutdown: F,
    ) -> ChatResult<()>
    where
        F: Future<Output = ()>,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let event_thread = EventLoop::spawn(self.config.protocol, events_rx)?;

        let max_frame_size = self.config.max_frame_size;
        let mut next_id: SessionId = 1;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.recv() => {
                    let Some(conn) = accepted else {
                        info!("listener closed, shutting down");
                        break;
                    };
                    let id = next_id;
                    next_id += 1;
                    let events = events_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, id, events, max_frame_size).await {
                            warn!(session = id, error = %e, "WebSocket connection error");
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        drop(listener);
        let _ = events_tx.send(ServerEvent::Shutdown);
        drop(events_tx);
        tokio::task::spawn_blocking(move || event_thread.join())
            .await
            .map_err(|e| ChatError::Other(format!("event loop join failed: {e}")))?
            .map_err(|_| ChatError::Other("event loop panicked".into()))
    }
}

/// Pump one connection: inbound frames to the event loop, queued frames out.
async fn handle_connection(
    mut conn: WebSocketConnection,
    id: SessionId,
    events: mpsc::UnboundedSender<ServerEvent>,
    max_frame_size: usize,
) -> ChatResult<()> {
    let remote = conn.remote_addr;
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    events
        .send(ServerEvent::Open {
            id,
            outbound: outbound_tx,
        })
        .map_err(|_| ChatError::Other("event loop stopped".into()))?;
    debug!(session = id, remote = %remote, "session opened");

    let (clean, code, reason) = loop {
        tokio::select! {
            queued = outbound_rx.recv() => match queued {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = websocket::ws_send(&mut conn.ws_stream, frame).await {
                        break (false, 1006, e.to_string());
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    // The event loop already released the session.
                    websocket::ws_close(&mut conn.ws_stream, CloseCode::from(code), &reason).await;
                    debug!(session = id, remote = %remote, code, "session closed by server");
                    return Ok(());
                }
                None => {
                    websocket::ws_close(&mut conn.ws_stream, CloseCode::Away, "session released")
                        .await;
                    return Ok(());
                }
            },

            inbound = websocket::ws_recv(&mut conn.ws_stream, max_frame_size) => match inbound {
                Ok(Some(Inbound::Frame(frame))) => {
                    if events.send(ServerEvent::Message { id, frame }).is_err() {
                        break (false, 1011, "event loop stopped".to_string());
                    }
                }
                Ok(Some(Inbound::Closed { code, reason })) => break (true, code, reason),
                Ok(Some(Inbound::Oversized { len })) => {
                    warn!(session = id, len, max_frame_size, "frame too large, closing session");
                    websocket::ws_close(&mut conn.ws_stream, CloseCode::Size, "frame too large").await;
                    break (false, 1009, format!("frame too large: {len} bytes"));
                }
                Ok(None) => break (false, 1006, "connection dropped".to_string()),
                Err(e) => {
                    debug!(session = id, error = %e, "WebSocket session ended");
                    break (false, 1006, e.to_string());
                }
            },
        }
    };

    let _ = events.send(ServerEvent::Close {
        id,
        clean,
        code,
        reason,
    });
    debug!(session = id, remote = %remote, clean, code, "session closed");
    Ok(())
}
