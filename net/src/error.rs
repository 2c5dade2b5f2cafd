use std::net::SocketAddr;

use thiserror::Error;

use crate::destination::Destination;

pub type TransportResult<T> = Result<T, TransportError>;

/// Failures of the transport. Outbound failures name the Destination and inbound failures name
/// the peer socket address so that the membership layer can attribute them to a member.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("failed to connect to {destination}: {msg}")]
    ConnectFailed { destination: Destination, msg: String },

    #[error("connection to {destination} is closed")]
    ConnectionClosed { destination: Destination },

    #[error("failed to write to {destination}: {msg}")]
    WriteFailed { destination: Destination, msg: String },

    #[error("failed to read from {peer}: {msg}")]
    ReadFailed { peer: SocketAddr, msg: String },

    #[error("malformed message received from {peer}: {msg}")]
    CorruptData { peer: SocketAddr, msg: String },

    #[error("failed to encode message: {msg}")]
    Encode { msg: String },

    #[error("failed to listen on {address}: {msg}")]
    Bind { address: String, msg: String },
}

impl TransportError {
    /// The outbound destination this error relates to, if any
    pub fn destination(self: &Self) -> Option<&Destination> {
        match self {
            TransportError::ConnectFailed { destination, .. }
            | TransportError::ConnectionClosed { destination }
            | TransportError::WriteFailed { destination, .. } => Some(destination),
            _ => None,
        }
    }

    /// The inbound peer this error relates to, if any
    pub fn peer(self: &Self) -> Option<SocketAddr> {
        match self {
            TransportError::ReadFailed { peer, .. } | TransportError::CorruptData { peer, .. } => {
                Some(*peer)
            }
            _ => None,
        }
    }
}
