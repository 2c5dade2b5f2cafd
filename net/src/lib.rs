/*
Wire level building blocks for the membership transport. Nothing in here knows about members,
views or handlers; it moves encoded messages between processes over plain TCP.
*/

/// Aliases for primitive types shared across the transport
pub mod data_types;

/// Network address of a peer process
pub mod destination;

/// Transport error taxonomy
pub mod error;

/// Boundary to the object serializer, and its MessagePack implementation
pub mod codec;

/// Reassembles messages from a byte stream that has no framing
pub mod decoder;

/// Thin wrappers around the standard library sockets. Threads own the sockets and
/// exchange data with callers through channels
pub mod sockets;
