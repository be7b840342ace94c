//! Abstract transport for chat sessions.
//!
//! The server wraps its WebSocket writer in this trait; the core only ever
//! hands it finished frames.

use crate::error::{ChatError, ChatResult};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// One transport payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }
}

/// Outbound half of a client connection.
///
/// Sends are fire-and-forget: `Ok` means the frame was queued, not delivered.
pub trait Transport {
    fn send(&self, frame: Frame) -> ChatResult<()>;
}

/// In-memory transport that records every frame it is given.
///
/// Clones share the same log, so a test can keep one handle and give the
/// other to a session.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    sent: Rc<RefCell<Vec<Frame>>>,
    closed: Rc<Cell<bool>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent so far.
    pub fn frames(&self) -> Vec<Frame> {
        self.sent.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.sent.borrow_mut().clear();
    }

    /// Make every later send fail, as if the peer had gone away.
    pub fn close(&self) {
        self.closed.set(true);
    }
}

impl Transport for MemoryTransport {
    fn send(&self, frame: Frame) -> ChatResult<()> {
        if self.closed.get() {
            return Err(ChatError::Transport("connection closed".into()));
        }
        self.sent.borrow_mut().push(frame);
        Ok(())
    }
}
