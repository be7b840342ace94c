//! Single-threaded execution context for the chat core.

use crate::codec::{MessageCodec, ProtocolVersion};
use crate::context::ContextStack;
use crate::dispatch::Dispatcher;
use crate::room::Room;

/// Everything a session needs while an event is processed: the active
/// context stack, the dispatcher, the codec and the room.
///
/// Not `Send`. The server builds one engine on its event thread and hands
/// `&ChatEngine` to every session call.
pub struct ChatEngine {
    stack: ContextStack,
    dispatcher: Dispatcher,
    codec: MessageCodec,
    room: Room,
}

impl ChatEngine {
    /// Engine with the standard dispatcher.
    pub fn new(version: ProtocolVersion) -> Self {
        Self::with_dispatcher(version, Dispatcher::standard())
    }

    pub fn with_dispatcher(version: ProtocolVersion, dispatcher: Dispatcher) -> Self {
        Self {
            stack: ContextStack::new(),
            dispatcher,
            codec: MessageCodec::new(version),
            room: Room::new(),
        }
    }

    pub fn stack(&self) -> &ContextStack {
        &self.stack
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    pub fn room(&self) -> &Room {
        &self.room
    }
}

impl Default for ChatEngine {
    fn default() -> Self {
        Self::new(ProtocolVersion::default())
    }
}
