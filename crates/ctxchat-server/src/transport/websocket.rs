//! WebSocket listener using tokio-tungstenite.
//!
//! Accepted connections are handed to the server through a channel; the
//! helpers below translate between tungstenite messages and core frames.

use ctxchat_core::{ChatError, ChatResult, Frame};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Default maximum frame size (1 MiB).
pub const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// What the peer sent.
#[derive(Debug)]
pub enum Inbound {
    Frame(Frame),
    /// The peer sent a close frame.
    Closed { code: u16, reason: String },
    /// A data frame exceeded the size limit.
    Oversized { len: usize },
}

/// Start the WebSocket listener.
///
/// Returns the bound address (useful with port 0) and a receiver that yields
/// accepted connections. Dropping the receiver stops the accept loop.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> ChatResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ChatError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => {
                    debug!(addr = %local_addr, "WebSocket listener stopped");
                    break;
                }
                result = tcp_listener.accept() => match result {
                    Ok((stream, addr)) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            match tokio_tungstenite::accept_async(stream).await {
                                Ok(ws_stream) => {
                                    debug!(remote = %addr, "WebSocket connection accepted");
                                    let conn = WebSocketConnection {
                                        ws_stream,
                                        remote_addr: addr,
                                    };
                                    if tx.send(conn).await.is_err() {
                                        warn!("WebSocket connection channel closed");
                                    }
                                }
                                Err(e) => {
                                    warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "TCP accept failed");
                    }
                },
            }
        }
    });

    Ok((local_addr, rx))
}

/// Send a core frame over a WebSocket.
pub async fn ws_send(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    frame: Frame,
) -> ChatResult<()> {
    let message = match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
    };
    ws.send(message)
        .await
        .map_err(|e| ChatError::Transport(format!("WS send failed: {e}")))
}

/// Send a close frame. Errors are ignored: the peer may already be gone.
pub async fn ws_close(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    code: CloseCode,
    reason: &str,
) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = ws.send(Message::Close(Some(frame))).await;
}

/// Receive the next data frame from a WebSocket.
///
/// Returns `None` if the stream ended without a close frame. Frames larger
/// than `max_frame_size` come back as [`Inbound::Oversized`].
pub async fn ws_recv(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    max_frame_size: usize,
) -> ChatResult<Option<Inbound>> {
    loop {
        let frame = match ws.next().await {
            Some(Ok(Message::Text(text))) => Frame::Text(text.to_string()),
            Some(Ok(Message::Binary(data))) => Frame::Binary(data.to_vec()),
            Some(Ok(Message::Close(close))) => {
                let (code, reason) = close
                    .map(|c| (u16::from(c.code), c.reason.to_string()))
                    .unwrap_or((1005, String::new()));
                return Ok(Some(Inbound::Closed { code, reason }));
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
                continue;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(ChatError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        };

        let len = match &frame {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        };
        if len > max_frame_size {
            return Ok(Some(Inbound::Oversized { len }));
        }
        return Ok(Some(Inbound::Frame(frame)));
    }
}
