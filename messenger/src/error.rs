use membership_net::error::TransportError;
use thiserror::Error;

use crate::{member::Member, message::MessageKind};

pub type MessengerResult<T> = Result<T, MessengerError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MessengerError {
    /// The operation is not valid in the messenger's current lifecycle state
    #[error("cannot {operation} while the messenger is {state}")]
    InvalidState { operation: String, state: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message arrived that has no registered handler. Indicates a protocol or wiring bug
    #[error("no handler registered for {kind} messages from {}", describe_sender(.sender))]
    Unhandled { kind: MessageKind, sender: Option<Member> },

    #[error("invalid configuration: {msg}")]
    Config { msg: String },
}

impl From<config::ConfigError> for MessengerError {
    fn from(err: config::ConfigError) -> Self {
        MessengerError::Config {
            msg: format!("{err}"),
        }
    }
}

fn describe_sender(sender: &Option<Member>) -> String {
    match sender {
        Some(member) => member.to_string(),
        None => String::from("an unknown sender"),
    }
}
