use std::sync::Arc;

use membership_net::{
    codec::{Codec, MsgPackCodec},
    destination::Destination,
    error::TransportError,
    sockets::{
        delivery::Delivery,
        tcp_channel::{ChannelObserver, ChannelState, TcpChannel},
    },
};

#[cfg(debug_assertions)]
use log::debug;

use crate::{error::MessengerResult, message::Message};

/// An outbound, write-only connection to one peer. Encodes messages on the caller's thread
/// and queues the bytes on the channel, so writes reach the peer in the order `send` was called
pub struct Connection {
    channel: TcpChannel,
    codec: Arc<MsgPackCodec>,
}

impl Connection {
    /// Starts connecting in the background. Never blocks on the network
    pub fn open(destination: &Destination, codec: &Arc<MsgPackCodec>, observer: &Arc<dyn ChannelObserver>) -> Self {
        Self {
            channel: TcpChannel::open(destination, observer),
            codec: codec.clone(),
        }
    }

    pub fn destination(self: &Self) -> &Destination { self.channel.destination() }

    pub fn state(self: &Self) -> ChannelState { self.channel.state() }

    pub fn is_closed(self: &Self) -> bool { self.state() == ChannelState::Closed }

    pub fn send(self: &Self, message: &Message) -> MessengerResult<Delivery> {
        let bytes = self
            .codec
            .encode(message)
            .map_err(|err| TransportError::Encode { msg: format!("{err}") })?;

        #[cfg(debug_assertions)]
        debug!("Connection: Queueing {} message of {} bytes for {}", message.kind(), bytes.len(), self.destination());

        Ok(self.channel.send(bytes)?)
    }

    /// Returns false if the connection was already closed
    pub fn close(self: &Self) -> bool { self.channel.close() }
}
