//! ctxchat-core: context-layered message dispatch for a broadcast chat.
//!
//! Provides the context stack, the layered dispatcher, the JSON message
//! codec, client sessions and the broadcast room. Transport is abstract.

pub mod codec;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod room;
pub mod session;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{Message, MessageCodec, Method, ProtocolVersion};
pub use context::{Context, ContextSet, ContextStack};
pub use dispatch::{Dispatcher, Operation, Proceed};
pub use engine::ChatEngine;
pub use error::{ChatError, ChatResult};
pub use room::Room;
pub use session::{ClientSession, SessionId};
pub use transport::{Frame, MemoryTransport, Transport};
