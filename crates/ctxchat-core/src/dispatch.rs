//! Layered dispatch: named operations refined per active context.
//!
//! An [`Operation`] has one base implementation and an ordered list of
//! refinements, each registered against a [`Context`]. Invoking it under an
//! active-context set wraps the base in every refinement whose context is
//! active. Later registrations wrap earlier ones, so the most recently
//! registered applicable refinement runs first and decides whether to
//! [`Proceed::proceed`] inward.

use crate::codec::{self, Message, Method};
use crate::context::{
    Context, ContextSet, ANONYMOUS, LOGIN_MESSAGE, PROTOCOL_V1, PROTOCOL_V2,
};
use crate::engine::ChatEngine;
use crate::error::{ChatError, ChatResult};
use crate::session::ClientSession;
use std::rc::Rc;
use tracing::trace;

/// Base implementation of an operation.
pub type BaseFn<E, A, T> = dyn Fn(&E, A) -> ChatResult<T> + 'static;

/// Refinement wrapped around the base while its context is active.
pub type RefinementFn<E, A, T> = dyn Fn(&E, A, Proceed<'_, E, A, T>) -> ChatResult<T> + 'static;

/// Capability handed to a refinement for running the rest of the chain.
pub struct Proceed<'a, E: ?Sized, A, T> {
    env: &'a E,
    inner: &'a [&'a RefinementFn<E, A, T>],
    base: &'a BaseFn<E, A, T>,
}

impl<E: ?Sized, A, T> Proceed<'_, E, A, T> {
    /// Run the next inner link (or the base) with `args`.
    pub fn proceed(self, args: A) -> ChatResult<T> {
        run_chain(self.env, self.inner, self.base, args)
    }
}

fn run_chain<E: ?Sized, A, T>(
    env: &E,
    links: &[&RefinementFn<E, A, T>],
    base: &BaseFn<E, A, T>,
    args: A,
) -> ChatResult<T> {
    match links.split_last() {
        Some((outer, inner)) => outer(env, args, Proceed { env, inner, base }),
        None => base(env, args),
    }
}

/// A named operation: one base plus context refinements.
pub struct Operation<E: ?Sized, A, T> {
    name: &'static str,
    base: Option<Box<BaseFn<E, A, T>>>,
    refinements: Vec<(Context, Box<RefinementFn<E, A, T>>)>,
}

impl<E: ?Sized, A, T> Operation<E, A, T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            base: None,
            refinements: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register the base implementation, replacing any previous one.
    pub fn set_base<F>(&mut self, base: F) -> &mut Self
    where
        F: Fn(&E, A) -> ChatResult<T> + 'static,
    {
        self.base = Some(Box::new(base));
        self
    }

    /// Register a refinement that applies while `context` is active.
    pub fn refine<F>(&mut self, context: Context, refinement: F) -> &mut Self
    where
        F: Fn(&E, A, Proceed<'_, E, A, T>) -> ChatResult<T> + 'static,
    {
        self.refinements.push((context, Box::new(refinement)));
        self
    }

    /// Contexts with at least one refinement, in registration order.
    pub fn refined_contexts(&self) -> impl Iterator<Item = Context> + '_ {
        self.refinements.iter().map(|(context, _)| *context)
    }

    /// Resolve the chain for `active` and run it.
    pub fn invoke(&self, env: &E, active: &ContextSet, args: A) -> ChatResult<T> {
        let base = self
            .base
            .as_deref()
            .ok_or(ChatError::MissingBase(self.name))?;
        let links: Vec<&RefinementFn<E, A, T>> = self
            .refinements
            .iter()
            .filter(|(context, _)| active.contains(context))
            .map(|(_, refinement)| &**refinement)
            .collect();

        trace!(
            operation = self.name,
            active = %active,
            refinements = links.len(),
            "invoking layered operation"
        );

        run_chain(env, &links, base, args)
    }
}

/// Arguments of `send-message`.
pub struct Outgoing {
    pub session: Rc<ClientSession>,
    pub data: String,
    pub method: Method,
}

/// Arguments of `handle-message`.
pub struct Incoming {
    pub session: Rc<ClientSession>,
    pub message: Message,
}

/// Registry of the chat engine's named operations.
pub struct Dispatcher {
    decode_data: Operation<(), String, String>,
    send_message: Operation<ChatEngine, Outgoing, ()>,
    handle_message: Operation<ChatEngine, Incoming, ()>,
}

impl Dispatcher {
    /// Operations with nothing registered.
    pub fn empty() -> Self {
        Self {
            decode_data: Operation::new("decode-data"),
            send_message: Operation::new("send-message"),
            handle_message: Operation::new("handle-message"),
        }
    }

    /// Operations with the chat service's bases and refinements.
    pub fn standard() -> Self {
        let mut dispatcher = Self::empty();

        dispatcher
            .decode_data
            .set_base(|_, data| Ok(data))
            .refine(PROTOCOL_V2, |_, data, next| next.proceed(data))
            .refine(PROTOCOL_V1, |_, data, _| Ok(codec::strip_markup(&data)));

        dispatcher
            .send_message
            .set_base(|engine: &ChatEngine, out: Outgoing| {
                let frame = engine.codec().encode(&Message::new(out.method, out.data))?;
                out.session.transmit(frame)
            })
            .refine(ANONYMOUS, |_, out: Outgoing, next| {
                if out.method == Method::Chat {
                    trace!(session = out.session.id(), "dropping chat for anonymous session");
                    return Ok(());
                }
                next.proceed(out)
            });

        dispatcher
            .handle_message
            .set_base(|engine: &ChatEngine, incoming: Incoming| {
                engine
                    .room()
                    .chat(engine, incoming.message.data(), &incoming.session);
                Ok(())
            })
            .refine(LOGIN_MESSAGE, |engine, incoming: Incoming, _| {
                let Incoming { session, message } = incoming;
                session.login(engine, message.into_data())
            });

        dispatcher
    }

    pub fn decode_data(&self) -> &Operation<(), String, String> {
        &self.decode_data
    }

    pub fn decode_data_mut(&mut self) -> &mut Operation<(), String, String> {
        &mut self.decode_data
    }

    pub fn send_message(&self) -> &Operation<ChatEngine, Outgoing, ()> {
        &self.send_message
    }

    pub fn send_message_mut(&mut self) -> &mut Operation<ChatEngine, Outgoing, ()> {
        &mut self.send_message
    }

    pub fn handle_message(&self) -> &Operation<ChatEngine, Incoming, ()> {
        &self.handle_message
    }

    pub fn handle_message_mut(&mut self) -> &mut Operation<ChatEngine, Incoming, ()> {
        &mut self.handle_message
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::standard()
    }
}
