//! Broadcast room: the set of live sessions and fan-out to them.

use crate::codec::Method;
use crate::engine::ChatEngine;
use crate::session::ClientSession;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

/// Registry of live sessions.
///
/// Membership is by reference identity: two sessions with equal state are
/// still distinct members.
#[derive(Debug, Default)]
pub struct Room {
    sessions: RefCell<Vec<Rc<ClientSession>>>,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Returns `false` if it is already a member.
    pub fn register(&self, session: &Rc<ClientSession>) -> bool {
        let mut sessions = self.sessions.borrow_mut();
        if sessions.iter().any(|s| Rc::ptr_eq(s, session)) {
            return false;
        }
        sessions.push(Rc::clone(session));
        debug!(session = session.id(), members = sessions.len(), "session registered");
        true
    }

    /// Remove a session. Returns `false` if it was not a member.
    pub fn unregister(&self, session: &ClientSession) -> bool {
        let mut sessions = self.sessions.borrow_mut();
        let before = sessions.len();
        sessions.retain(|s| !std::ptr::eq(Rc::as_ptr(s), session));
        let removed = sessions.len() != before;
        if removed {
            debug!(session = session.id(), members = sessions.len(), "session unregistered");
        }
        removed
    }

    /// Snapshot of the members, minus `exclude`.
    ///
    /// The snapshot is taken up front so sends may register or unregister
    /// sessions without disturbing an ongoing fan-out.
    pub fn clients(&self, exclude: Option<&ClientSession>) -> Vec<Rc<ClientSession>> {
        self.sessions
            .borrow()
            .iter()
            .filter(|s| exclude.is_none_or(|ex| !std::ptr::eq(Rc::as_ptr(*s), ex)))
            .cloned()
            .collect()
    }

    /// Send `msg` as an `inform` message to every member except `exclude`.
    pub fn inform(&self, engine: &ChatEngine, msg: &str, exclude: Option<&ClientSession>) {
        for client in self.clients(exclude) {
            if let Err(e) = client.send(engine, msg, Method::Inform) {
                warn!(session = client.id(), error = %e, "inform delivery failed");
            }
        }
    }

    /// Send `"<sender>: <msg>"` as chat to every member, the sender included.
    pub fn chat(&self, engine: &ChatEngine, msg: &str, sender: &ClientSession) {
        let line = format!("{}: {msg}", sender.display_name());
        for client in self.clients(None) {
            if let Err(e) = client.send(engine, line.as_str(), Method::Chat) {
                warn!(session = client.id(), error = %e, "chat delivery failed");
            }
        }
    }

    pub fn contains(&self, session: &ClientSession) -> bool {
        self.sessions
            .borrow()
            .iter()
            .any(|s| std::ptr::eq(Rc::as_ptr(s), session))
    }

    pub fn len(&self) -> usize {
        self.sessions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.borrow().is_empty()
    }
}
