//! Per-connection client session.
//!
//! A session is either anonymous (the initial state) or identified by a
//! claimed username. The identity and the `ANONYMOUS` context move together:
//! both only change through [`ClientSession::login`] and
//! [`ClientSession::logout`].

use crate::codec::Method;
use crate::context::{ContextSet, ANONYMOUS};
use crate::dispatch::{Incoming, Outgoing};
use crate::engine::ChatEngine;
use crate::error::ChatResult;
use crate::transport::{Frame, Transport};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// Server-assigned connection identifier.
pub type SessionId = u64;

/// One connected client.
pub struct ClientSession {
    id: SessionId,
    identity: RefCell<Option<String>>,
    contexts: RefCell<ContextSet>,
    transport: Box<dyn Transport>,
}

impl ClientSession {
    /// Create an anonymous session sending through `transport`.
    pub fn new(id: SessionId, transport: impl Transport + 'static) -> Rc<Self> {
        Rc::new(Self {
            id,
            identity: RefCell::new(None),
            contexts: RefCell::new(ContextSet::from([ANONYMOUS])),
            transport: Box::new(transport),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> Option<String> {
        self.identity.borrow().clone()
    }

    pub fn is_identified(&self) -> bool {
        self.identity.borrow().is_some()
    }

    /// Name used when quoting this session in broadcasts.
    ///
    /// The standard dispatcher drops every chat sent on behalf of an
    /// anonymous session, so the `"anonymous"` fallback only shows up with a
    /// dispatcher that has no `ANONYMOUS` refinement on `send-message`.
    pub fn display_name(&self) -> String {
        self.identity().unwrap_or_else(|| "anonymous".to_string())
    }

    /// Contexts that hold for every call made on behalf of this session.
    pub fn contexts(&self) -> ContextSet {
        self.contexts.borrow().clone()
    }

    fn assign_identity(&self, identity: Option<String>) {
        let mut contexts = self.contexts.borrow_mut();
        if identity.is_some() {
            contexts.remove(&ANONYMOUS);
        } else {
            contexts.insert(ANONYMOUS);
        }
        *self.identity.borrow_mut() = identity;
    }

    /// Hand an encoded frame to the transport.
    pub(crate) fn transmit(&self, frame: Frame) -> ChatResult<()> {
        self.transport.send(frame)
    }

    /// Send `data` to this client through the `send-message` chain.
    pub fn send(
        self: &Rc<Self>,
        engine: &ChatEngine,
        data: impl Into<String>,
        method: Method,
    ) -> ChatResult<()> {
        let _scope = engine.stack().push(self.contexts());
        engine.dispatcher().send_message().invoke(
            engine,
            &engine.stack().active(),
            Outgoing {
                session: Rc::clone(self),
                data: data.into(),
                method,
            },
        )
    }

    /// Transport opened: join the room.
    pub fn on_open(self: &Rc<Self>, engine: &ChatEngine) {
        engine.room().register(self);
    }

    /// Decode an incoming frame and run the `handle-message` chain.
    pub fn on_message(self: &Rc<Self>, engine: &ChatEngine, frame: &Frame) -> ChatResult<()> {
        let message = engine.codec().decode(engine, frame)?;

        let mut contexts = self.contexts();
        contexts.extend(message.method().context());
        let _scope = engine.stack().push(contexts);

        debug!(
            session = self.id,
            method = %message.method(),
            active = %engine.stack().active(),
            "handling message"
        );

        engine.dispatcher().handle_message().invoke(
            engine,
            &engine.stack().active(),
            Incoming {
                session: Rc::clone(self),
                message,
            },
        )
    }

    /// Transport closed: log out and leave the room.
    pub fn on_close(self: &Rc<Self>, engine: &ChatEngine, clean: bool, code: u16, reason: &str) {
        debug!(session = self.id, clean, code, reason, "session closed");
        self.logout(engine);
        engine.room().unregister(self);
    }

    /// Claim `name` as this session's identity.
    ///
    /// Other members are informed; the session itself gets an `OK` login
    /// reply and a greeting, which must reach it even while the caller's
    /// scope still has `ANONYMOUS` active.
    pub fn login(self: &Rc<Self>, engine: &ChatEngine, name: String) -> ChatResult<()> {
        self.assign_identity(Some(name.clone()));
        debug!(session = self.id, identity = %name, "logged in");

        engine
            .room()
            .inform(engine, &format!("{name} logged in!"), Some(self));

        let _visible = engine.stack().suppress(ANONYMOUS);
        self.send(engine, "OK", Method::Login)?;
        self.send(engine, "You are logged in!", Method::Chat)
    }

    /// Drop this session's identity. A no-op for anonymous sessions.
    pub fn logout(self: &Rc<Self>, engine: &ChatEngine) {
        let Some(name) = self.identity() else {
            return;
        };

        engine
            .room()
            .inform(engine, &format!("{name} logged out!"), Some(self));
        engine.room().unregister(self);
        self.assign_identity(None);
        debug!(session = self.id, identity = %name, "logged out");
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("identity", &self.identity.borrow())
            .field("contexts", &self.contexts.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ProtocolVersion;
    use crate::error::ChatError;
    use crate::transport::MemoryTransport;

    fn connect(engine: &ChatEngine, id: SessionId) -> (Rc<ClientSession>, MemoryTransport) {
        let transport = MemoryTransport::new();
        let session = ClientSession::new(id, transport.clone());
        session.on_open(engine);
        (session, transport)
    }

    fn received(transport: &MemoryTransport) -> Vec<(String, String)> {
        transport
            .frames()
            .iter()
            .map(|frame| {
                let value: serde_json::Value =
                    serde_json::from_str(frame.as_text().unwrap()).unwrap();
                (
                    value["method"].as_str().unwrap().to_string(),
                    value["data"].as_str().unwrap().to_string(),
                )
            })
            .collect()
    }

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_string())
    }

    fn pair(method: &str, data: &str) -> (String, String) {
        (method.to_string(), data.to_string())
    }

    #[test]
    fn new_session_is_anonymous() {
        let session = ClientSession::new(1, MemoryTransport::new());
        assert!(!session.is_identified());
        assert_eq!(session.identity(), None);
        assert!(session.contexts().contains(&ANONYMOUS));
    }

    #[test]
    fn anonymous_session_drops_chat_only() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (session, transport) = connect(&engine, 1);

        session.send(&engine, "hi", Method::Chat).unwrap();
        assert!(transport.is_empty());

        session.send(&engine, "news", Method::Inform).unwrap();
        session.send(&engine, "OK", Method::Login).unwrap();
        assert_eq!(
            received(&transport),
            vec![pair("inform", "news"), pair("login", "OK")]
        );
    }

    #[test]
    fn login_transition() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (alice, alice_tx) = connect(&engine, 1);
        let (_bob, bob_tx) = connect(&engine, 2);
        let (_carol, carol_tx) = connect(&engine, 3);

        alice
            .on_message(&engine, &text(r#"{"method":"login","data":"alice"}"#))
            .unwrap();

        assert!(alice.is_identified());
        assert_eq!(alice.identity().as_deref(), Some("alice"));
        assert!(!alice.contexts().contains(&ANONYMOUS));

        assert_eq!(
            received(&alice_tx),
            vec![pair("login", "OK"), pair("chat", "You are logged in!")]
        );
        for other in [&bob_tx, &carol_tx] {
            assert_eq!(received(other), vec![pair("inform", "alice logged in!")]);
        }
        assert!(engine.stack().active().is_empty());
    }

    #[test]
    fn identified_chat_reaches_identified_members_including_sender() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (alice, alice_tx) = connect(&engine, 1);
        let (bob, bob_tx) = connect(&engine, 2);
        let (_anon, anon_tx) = connect(&engine, 3);
        alice.login(&engine, "alice".into()).unwrap();
        bob.login(&engine, "bob".into()).unwrap();
        for tx in [&alice_tx, &bob_tx, &anon_tx] {
            tx.clear();
        }

        alice
            .on_message(&engine, &text(r#"{"method":"chat","data":"hello"}"#))
            .unwrap();

        assert_eq!(received(&alice_tx), vec![pair("chat", "alice: hello")]);
        assert_eq!(received(&bob_tx), vec![pair("chat", "alice: hello")]);
        assert!(anon_tx.is_empty());
    }

    #[test]
    fn anonymous_sender_chat_is_dropped() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (bob, bob_tx) = connect(&engine, 1);
        bob.login(&engine, "bob".into()).unwrap();
        bob_tx.clear();
        let (anon, anon_tx) = connect(&engine, 2);

        anon.on_message(&engine, &text(r#"{"data":"psst"}"#)).unwrap();

        assert!(bob_tx.is_empty());
        assert!(anon_tx.is_empty());
    }

    #[test]
    fn unknown_method_is_handled_as_chat() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (alice, alice_tx) = connect(&engine, 1);
        alice.login(&engine, "alice".into()).unwrap();
        alice_tx.clear();

        alice
            .on_message(&engine, &text(r#"{"method":"wave","data":"o/"}"#))
            .unwrap();

        assert_eq!(received(&alice_tx), vec![pair("chat", "alice: o/")]);
    }

    #[test]
    fn logout_is_idempotent() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (alice, _alice_tx) = connect(&engine, 1);
        let (_bob, bob_tx) = connect(&engine, 2);
        alice.login(&engine, "alice".into()).unwrap();
        bob_tx.clear();

        alice.logout(&engine);
        alice.logout(&engine);

        assert_eq!(received(&bob_tx), vec![pair("inform", "alice logged out!")]);
        assert!(!alice.is_identified());
        assert!(alice.contexts().contains(&ANONYMOUS));
        assert_eq!(engine.room().len(), 1);
    }

    #[test]
    fn close_removes_anonymous_sessions_too() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (anon, _anon_tx) = connect(&engine, 1);
        let (_bob, bob_tx) = connect(&engine, 2);
        assert_eq!(engine.room().len(), 2);

        anon.on_close(&engine, true, 1000, "bye");

        assert!(!engine.room().contains(&anon));
        assert_eq!(engine.room().len(), 1);
        assert!(bob_tx.is_empty());
    }

    #[test]
    fn close_logs_out_identified_session() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (alice, _alice_tx) = connect(&engine, 1);
        let (_bob, bob_tx) = connect(&engine, 2);
        alice.login(&engine, "alice".into()).unwrap();
        bob_tx.clear();

        alice.on_close(&engine, false, 1006, "");

        assert_eq!(received(&bob_tx), vec![pair("inform", "alice logged out!")]);
        assert_eq!(engine.room().len(), 1);
    }

    #[test]
    fn binary_frame_is_rejected() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (session, transport) = connect(&engine, 1);
        let err = session
            .on_message(&engine, &Frame::Binary(vec![1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedContent));
        assert!(transport.is_empty());
    }

    #[test]
    fn relogin_renames_session() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (alice, _alice_tx) = connect(&engine, 1);
        let (_bob, bob_tx) = connect(&engine, 2);
        alice.login(&engine, "alice".into()).unwrap();
        bob_tx.clear();

        alice.login(&engine, "ally".into()).unwrap();

        assert_eq!(alice.identity().as_deref(), Some("ally"));
        assert!(!alice.contexts().contains(&ANONYMOUS));
        assert_eq!(received(&bob_tx), vec![pair("inform", "ally logged in!")]);
    }

    #[test]
    fn send_failure_is_reported() {
        let engine = ChatEngine::new(ProtocolVersion::V2);
        let (session, transport) = connect(&engine, 1);
        transport.close();
        let err = session.send(&engine, "x", Method::Inform).unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
        assert!(engine.stack().active().is_empty());
    }
}
