//! Single-threaded event loop driving the chat engine.
//!
//! Connection tasks never touch sessions directly. They post
//! [`ServerEvent`]s to this loop, which owns the [`ChatEngine`] and processes
//! one event completely (fan-out included) before taking the next.

use ctxchat_core::{
    ChatEngine, ChatError, ChatResult, ClientSession, Frame, ProtocolVersion, SessionId, Transport,
};
use std::collections::HashMap;
use std::rc::Rc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_QUEUE: usize = 64;

/// Close code sent when the server stops (going away).
const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code sent for binary frames (unsupported data).
const CLOSE_UNSUPPORTED: u16 = 1003;

/// Lifecycle event reported by a connection task.
#[derive(Debug)]
pub enum ServerEvent {
    Open {
        id: SessionId,
        outbound: mpsc::Sender<Outbound>,
    },
    Message {
        id: SessionId,
        frame: Frame,
    },
    Close {
        id: SessionId,
        clean: bool,
        code: u16,
        reason: String,
    },
    /// Close every session and stop the loop.
    Shutdown,
}

/// What the event loop asks a connection's writer to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    /// Send a close frame and end the connection.
    Close { code: u16, reason: String },
}

/// Queues frames for a connection's writer task.
struct ConnectionTransport {
    outbound: mpsc::Sender<Outbound>,
}

impl Transport for ConnectionTransport {
    fn send(&self, frame: Frame) -> ChatResult<()> {
        self.outbound
            .try_send(Outbound::Frame(frame))
            .map_err(|e| match e {
                TrySendError::Full(_) => ChatError::Transport("outbound queue full".into()),
                TrySendError::Closed(_) => ChatError::Transport("connection writer gone".into()),
            })
    }
}

/// A live session and the writer queue behind it.
struct Connection {
    session: Rc<ClientSession>,
    outbound: mpsc::Sender<Outbound>,
}

/// Owns the engine and the live sessions keyed by connection id.
pub struct EventLoop {
    engine: ChatEngine,
    connections: HashMap<SessionId, Connection>,
}

impl EventLoop {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            engine: ChatEngine::new(version),
            connections: HashMap::new(),
        }
    }

    /// Run the loop on a dedicated thread until shutdown is requested or
    /// every event sender is dropped.
    pub fn spawn(
        version: ProtocolVersion,
        events: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("ctxchat-events".into())
            .spawn(move || EventLoop::new(version).run(events))
    }

    pub fn run(mut self, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
        info!(protocol = %self.engine.codec().version(), "event loop started");
        while let Some(event) = events.blocking_recv() {
            let stop = matches!(event, ServerEvent::Shutdown);
            self.handle(event);
            if stop {
                break;
            }
        }
        self.disconnect_all();
        info!("event loop stopped");
    }

    pub fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Open { id, outbound } => {
                let session = ClientSession::new(
                    id,
                    ConnectionTransport {
                        outbound: outbound.clone(),
                    },
                );
                session.on_open(&self.engine);
                self.connections.insert(id, Connection { session, outbound });
            }
            ServerEvent::Message { id, frame } => {
                let Some(session) = self.connections.get(&id).map(|c| Rc::clone(&c.session))
                else {
                    debug!(session = id, "message for unknown session");
                    return;
                };
                match session.on_message(&self.engine, &frame) {
                    Ok(()) => {}
                    Err(ChatError::UnsupportedContent) => {
                        warn!(session = id, "binary frame received, closing session");
                        self.disconnect(id, CLOSE_UNSUPPORTED, "binary content is not supported");
                    }
                    Err(e) => {
                        warn!(session = id, error = %e, "message dropped");
                    }
                }
            }
            ServerEvent::Close {
                id,
                clean,
                code,
                reason,
            } => self.close(id, clean, code, &reason),
            ServerEvent::Shutdown => {
                info!(open_sessions = self.session_count(), "shutdown requested");
                self.disconnect_all();
            }
        }
    }

    /// The peer's connection ended: release the session.
    fn close(&mut self, id: SessionId, clean: bool, code: u16, reason: &str) {
        if let Some(conn) = self.connections.remove(&id) {
            conn.session.on_close(&self.engine, clean, code, reason);
        }
    }

    /// Server-side close: tell the writer to send `code`, then release the
    /// session. If the queue is full, dropping it still ends the writer.
    fn disconnect(&mut self, id: SessionId, code: u16, reason: &str) {
        let Some(conn) = self.connections.remove(&id) else {
            return;
        };
        let close = Outbound::Close {
            code,
            reason: reason.to_string(),
        };
        if let Err(e) = conn.outbound.try_send(close) {
            debug!(session = id, error = %e, "close frame not queued");
        }
        conn.session.on_close(&self.engine, false, code, reason);
    }

    fn disconnect_all(&mut self) {
        let ids: Vec<SessionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.disconnect(id, CLOSE_GOING_AWAY, "server shutting down");
        }
    }

    #[cfg(test)]
    pub fn engine(&self) -> &ChatEngine {
        &self.engine
    }

    pub fn session_count(&self) -> usize {
        self.connections.len()
    }
}
