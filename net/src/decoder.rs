use std::{marker::PhantomData, sync::Arc};

use bytes::{Buf, BytesMut};

#[cfg(debug_assertions)]
use log::debug;

use crate::codec::{Codec, DecodeError};

const INITIAL_CAPACITY: usize = 4096;

/// Reassembles messages from a stream of byte chunks. The stream carries no length prefix, so
/// every attempt decodes from the first unconsumed byte and a "need more data" outcome leaves
/// the buffer untouched until the next chunk arrives. Bytes are only discarded once the message
/// they belong to has been decoded in full.
pub struct StreamDecoder<M, C: Codec<M>> {
    codec: Arc<C>,
    buffer: BytesMut,
    decoded_count: usize,
    _message: PhantomData<fn() -> M>,
}

impl<M, C: Codec<M>> StreamDecoder<M, C> {
    pub fn new(codec: &Arc<C>) -> Self {
        Self {
            codec: codec.clone(),
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            decoded_count: 0,
            _message: PhantomData,
        }
    }

    /// Number of bytes received but not yet part of a decoded message
    pub fn buffered(self: &Self) -> usize { self.buffer.len() }

    /// Number of messages decoded so far
    pub fn decoded_count(self: &Self) -> usize { self.decoded_count }

    /// Appends a chunk received from the stream
    pub fn extend(self: &mut Self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Decodes the next message if all of its bytes have arrived. `Ok(None)` means wait for
    /// more bytes. An error means the stream is corrupt and must be abandoned.
    pub fn try_next(self: &mut Self) -> Result<Option<M>, DecodeError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.codec.decode(&self.buffer[..]) {
            Ok((_, 0)) => Err(DecodeError::CorruptData {
                msg: String::from("codec decoded a message from zero bytes"),
            }),
            Ok((_, consumed)) if consumed > self.buffer.len() => Err(DecodeError::CorruptData {
                msg: format!(
                    "codec consumed {consumed} bytes but only {} were available",
                    self.buffer.len()
                ),
            }),
            Ok((message, consumed)) => {
                #[cfg(debug_assertions)]
                debug!("StreamDecoder: Decoded message from {consumed} of {} buffered bytes", self.buffer.len());

                self.buffer.advance(consumed);
                self.decoded_count += 1;
                Ok(Some(message))
            }
            Err(DecodeError::NeedMoreData) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Appends a chunk then decodes every message that is now complete
    pub fn decode_chunk(self: &mut Self, chunk: &[u8]) -> Result<Vec<M>, DecodeError> {
        self.extend(chunk);
        let mut messages = Vec::new();
        while let Some(message) = self.try_next()? {
            messages.push(message);
        }
        Ok(messages)
    }
}
