use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

#[cfg(debug_assertions)]
use log::debug;

use crate::{
    error::{MessengerError, MessengerResult},
    message::{Message, MessageKind},
};

/// Handles messages of the kind it was registered for. Called on the reader thread that
/// decoded the message, so implementations should hand long running work to another thread
pub trait MessageHandler: Send + Sync {
    fn handle(self: &Self, message: Message);
}

impl<F> MessageHandler for F
where
    F: Fn(Message) + Send + Sync,
{
    fn handle(self: &Self, message: Message) {
        self(message)
    }
}

/// Routes each decoded message to the handler registered for its kind
pub struct Dispatcher {
    handlers: RwLock<HashMap<MessageKind, Arc<dyn MessageHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::with_capacity(MessageKind::ALL.len())),
        }
    }

    /// Binds `handler` to `kind`, replacing any handler registered before. Returns true if a
    /// handler was replaced
    pub fn register(self: &Self, kind: MessageKind, handler: Arc<dyn MessageHandler>) -> bool {
        self.handlers.write().unwrap().insert(kind, handler).is_some()
    }

    pub fn is_registered(self: &Self, kind: MessageKind) -> bool {
        self.handlers.read().unwrap().contains_key(&kind)
    }

    /// Invokes the handler for the message's kind on the calling thread. A message with no
    /// handler is an error and no handler is invoked
    pub fn dispatch(self: &Self, message: Message) -> MessengerResult<()> {
        let kind = message.kind();
        let handler = self.handlers.read().unwrap().get(&kind).cloned();
        match handler {
            Some(handler) => {
                #[cfg(debug_assertions)]
                debug!("Dispatcher: Dispatching {kind} message");

                handler.handle(message);
                Ok(())
            }
            None => Err(MessengerError::Unhandled {
                kind,
                sender: message.sender,
            }),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self { Self::new() }
}
