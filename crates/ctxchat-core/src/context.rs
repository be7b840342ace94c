//! Contexts and the scoped active-context stack.
//!
//! A [`Context`] names a condition (a session is anonymous, the message being
//! handled is a login, the wire protocol is v1). Which contexts are active
//! decides which refinements the dispatcher wraps around an operation.
//!
//! The [`ContextStack`] tracks the active set for the current call chain.
//! Every change is tied to a scope guard, so the previous set comes back when
//! the guard drops, whether the scope ended normally, through `?`, or by
//! unwinding.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;

/// Identity token for a condition. Only identity and membership matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Context(&'static str);

impl Context {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// The session has not claimed a username yet.
pub const ANONYMOUS: Context = Context::new("anonymous");
/// The message being handled is a `login` message.
pub const LOGIN_MESSAGE: Context = Context::new("login-message");
/// The message being handled is a `chat` message.
pub const CHAT_MESSAGE: Context = Context::new("chat-message");
/// Wire protocol version 1 (markup is stripped from incoming data).
pub const PROTOCOL_V1: Context = Context::new("protocol-v1");
/// Wire protocol version 2 (incoming data is kept verbatim).
pub const PROTOCOL_V2: Context = Context::new("protocol-v2");

/// An ordered set of contexts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSet(BTreeSet<Context>);

impl ContextSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, context: &Context) -> bool {
        self.0.contains(context)
    }

    /// Returns `true` if the context was not already present.
    pub fn insert(&mut self, context: Context) -> bool {
        self.0.insert(context)
    }

    /// Returns `true` if the context was present.
    pub fn remove(&mut self, context: &Context) -> bool {
        self.0.remove(context)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[Context; N]> for ContextSet {
    fn from(contexts: [Context; N]) -> Self {
        Self(contexts.into_iter().collect())
    }
}

impl FromIterator<Context> for ContextSet {
    fn from_iter<I: IntoIterator<Item = Context>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Context> for ContextSet {
    fn extend<I: IntoIterator<Item = Context>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for ContextSet {
    type Item = Context;
    type IntoIter = std::collections::btree_set::IntoIter<Context>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, context) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{context}")?;
        }
        f.write_str("}")
    }
}

/// The active-context set of a single-threaded call chain.
///
/// Not `Sync`: one stack belongs to one event-processing thread.
#[derive(Debug, Default)]
pub struct ContextStack {
    active: RefCell<ContextSet>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate `contexts` until the returned scope drops.
    ///
    /// Only contexts that were not already active are recorded, so dropping
    /// the scope never removes a context an outer scope activated.
    #[must_use = "contexts are deactivated as soon as the scope is dropped"]
    pub fn push(&self, contexts: impl IntoIterator<Item = Context>) -> ActivationScope<'_> {
        let mut active = self.active.borrow_mut();
        let added: Vec<Context> = contexts
            .into_iter()
            .filter(|context| active.insert(*context))
            .collect();
        ActivationScope { stack: self, added }
    }

    /// Deactivate `context` until the returned scope drops.
    #[must_use = "the context is restored as soon as the scope is dropped"]
    pub fn suppress(&self, context: Context) -> SuppressionScope<'_> {
        let removed = self.active.borrow_mut().remove(&context);
        SuppressionScope {
            stack: self,
            context,
            removed,
        }
    }

    /// Snapshot of the currently active contexts.
    pub fn active(&self) -> ContextSet {
        self.active.borrow().clone()
    }

    pub fn is_active(&self, context: Context) -> bool {
        self.active.borrow().contains(&context)
    }
}

/// Guard returned by [`ContextStack::push`].
#[derive(Debug)]
pub struct ActivationScope<'a> {
    stack: &'a ContextStack,
    added: Vec<Context>,
}

impl Drop for ActivationScope<'_> {
    fn drop(&mut self) {
        let mut active = self.stack.active.borrow_mut();
        for context in &self.added {
            active.remove(context);
        }
    }
}

/// Guard returned by [`ContextStack::suppress`].
#[derive(Debug)]
pub struct SuppressionScope<'a> {
    stack: &'a ContextStack,
    context: Context,
    removed: bool,
}

impl Drop for SuppressionScope<'_> {
    fn drop(&mut self) {
        if self.removed {
            self.stack.active.borrow_mut().insert(self.context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_activates_until_scope_ends() {
        let stack = ContextStack::new();
        {
            let _scope = stack.push([ANONYMOUS, LOGIN_MESSAGE]);
            assert!(stack.is_active(ANONYMOUS));
            assert!(stack.is_active(LOGIN_MESSAGE));
        }
        assert!(stack.active().is_empty());
    }

    #[test]
    fn nested_push_keeps_outer_contexts() {
        let stack = ContextStack::new();
        let _outer = stack.push([ANONYMOUS]);
        {
            let _inner = stack.push([ANONYMOUS, PROTOCOL_V1]);
            assert_eq!(stack.active(), ContextSet::from([ANONYMOUS, PROTOCOL_V1]));
        }
        // The inner push found ANONYMOUS already active and must not remove it.
        assert_eq!(stack.active(), ContextSet::from([ANONYMOUS]));
    }

    #[test]
    fn suppress_restores_context() {
        let stack = ContextStack::new();
        let _outer = stack.push([ANONYMOUS, LOGIN_MESSAGE]);
        {
            let _hidden = stack.suppress(ANONYMOUS);
            assert!(!stack.is_active(ANONYMOUS));
            assert!(stack.is_active(LOGIN_MESSAGE));
        }
        assert!(stack.is_active(ANONYMOUS));
    }

    #[test]
    fn suppress_inactive_context_is_noop() {
        let stack = ContextStack::new();
        {
            let _hidden = stack.suppress(ANONYMOUS);
            assert!(!stack.is_active(ANONYMOUS));
        }
        assert!(!stack.is_active(ANONYMOUS));
    }

    #[test]
    fn push_inside_suppress_is_undone_first() {
        let stack = ContextStack::new();
        let _outer = stack.push([ANONYMOUS]);
        {
            let _hidden = stack.suppress(ANONYMOUS);
            {
                let _again = stack.push([ANONYMOUS]);
                assert!(stack.is_active(ANONYMOUS));
            }
            assert!(!stack.is_active(ANONYMOUS));
        }
        assert!(stack.is_active(ANONYMOUS));
    }

    #[test]
    fn early_return_restores_stack() {
        fn failing(stack: &ContextStack) -> Result<u32, std::num::ParseIntError> {
            let _scope = stack.push([PROTOCOL_V1]);
            let n: u32 = "not a number".parse()?;
            Ok(n)
        }

        let stack = ContextStack::new();
        assert!(failing(&stack).is_err());
        assert!(!stack.is_active(PROTOCOL_V1));
    }

    #[test]
    fn panic_restores_stack() {
        let stack = ContextStack::new();
        let _outer = stack.push([ANONYMOUS]);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = stack.push([LOGIN_MESSAGE]);
            let _hidden = stack.suppress(ANONYMOUS);
            panic!("handler failed");
        }));
        assert!(result.is_err());
        assert_eq!(stack.active(), ContextSet::from([ANONYMOUS]));
    }

    #[test]
    fn context_set_display_is_ordered() {
        let set = ContextSet::from([PROTOCOL_V1, ANONYMOUS]);
        assert_eq!(set.to_string(), "{anonymous, protocol-v1}");
    }

    #[test]
    fn context_identity_is_its_name() {
        assert_eq!(ANONYMOUS.name(), "anonymous");
        assert_eq!(Context::new("login-message"), LOGIN_MESSAGE);
        assert_ne!(PROTOCOL_V1, PROTOCOL_V2);
    }
}
