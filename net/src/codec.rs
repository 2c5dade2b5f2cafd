/*
The boundary to the object serializer. Encoded messages are written to the wire back to back with
no length prefix, so decoding has to be able to tell "these bytes are only the start of a message"
apart from "these bytes are not a message at all".
*/

use std::io::{self, Cursor};

use rmp_serde::{decode, Deserializer, Serializer};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub type EncodeResult = Result<Vec<u8>, EncodeError>;

/// On success the decoded message and the number of bytes it occupied at the front of the buffer
pub type DecodeResult<M> = Result<(M, usize), DecodeError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("{msg}")]
    Error { msg: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The buffer holds the beginning of a message. Retry once more bytes have arrived
    #[error("not enough data to decode a message")]
    NeedMoreData,

    /// The buffer does not start with a valid message. Retrying will never succeed
    #[error("corrupt data: {msg}")]
    CorruptData { msg: String },
}

pub trait Codec<M>: Send + Sync {
    fn encode(self: &Self, message: &M) -> EncodeResult;

    /// Decodes one message from the front of `buffer`. Must not report success unless the
    /// whole message was present, and must report the exact number of bytes it consumed
    fn decode(self: &Self, buffer: &[u8]) -> DecodeResult<M>;
}

const BUFFER_CAPACITY: usize = 512;

/// Encodes any serde type as MessagePack
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    pub fn new() -> Self { Self }
}

impl<M> Codec<M> for MsgPackCodec
where
    M: Serialize + DeserializeOwned,
{
    fn encode(self: &Self, message: &M) -> EncodeResult {
        let mut buffer = Vec::with_capacity(BUFFER_CAPACITY);
        let mut serializer = Serializer::new(&mut buffer);
        match message.serialize(&mut serializer) {
            Ok(_) => Ok(buffer),
            Err(err) => Err(EncodeError::Error {
                msg: format!("{err}"),
            }),
        }
    }

    fn decode(self: &Self, buffer: &[u8]) -> DecodeResult<M> {
        if buffer.is_empty() {
            return Err(DecodeError::NeedMoreData);
        }

        let mut cursor = Cursor::new(buffer);
        let result = {
            let mut deserializer = Deserializer::new(&mut cursor);
            M::deserialize(&mut deserializer)
        };

        match result {
            Ok(message) => Ok((message, cursor.position() as usize)),
            Err(err) if is_truncated(&err) => Err(DecodeError::NeedMoreData),
            Err(err) => Err(DecodeError::CorruptData {
                msg: format!("{err}"),
            }),
        }
    }
}

/// Running out of input part way through a value is the only recoverable failure
fn is_truncated(err: &decode::Error) -> bool {
    match err {
        decode::Error::InvalidMarkerRead(e) | decode::Error::InvalidDataRead(e) => {
            e.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Probe {
        sequence: u32,
        label: String,
        tags: Vec<String>,
    }

    fn probe() -> Probe {
        Probe {
            sequence: 26,
            label: String::from("probe"),
            tags: vec![String::from("a"), String::from("bb")],
        }
    }

    #[test]
    fn roundtrip_probe() {
        let codec = MsgPackCodec::new();
        let original = probe();

        let buffer = codec.encode(&original).unwrap();
        let (decoded, consumed): (Probe, usize) = codec.decode(&buffer).unwrap();

        assert_eq!(original, decoded);
        assert_eq!(buffer.len(), consumed);
    }

    #[test]
    fn should_report_consumed_bytes_when_more_follow() {
        let codec = MsgPackCodec::new();
        let mut buffer = Codec::<Probe>::encode(&codec, &probe()).unwrap();
        let first_length = buffer.len();
        buffer.extend(Codec::<Probe>::encode(&codec, &probe()).unwrap());

        let (_, consumed): (Probe, usize) = codec.decode(&buffer).unwrap();
        assert_eq!(first_length, consumed);
    }

    #[test]
    fn should_need_more_data_for_every_proper_prefix() {
        let codec = MsgPackCodec::new();
        let buffer = Codec::<Probe>::encode(&codec, &probe()).unwrap();

        for length in 0..buffer.len() {
            let result: DecodeResult<Probe> = codec.decode(&buffer[..length]);
            assert_eq!(Err(DecodeError::NeedMoreData), result.map(|_| ()), "prefix of {length} bytes");
        }
    }

    #[test]
    fn should_report_corrupt_data() {
        let codec = MsgPackCodec::new();

        // 0xc1 is a reserved marker that never starts a valid MessagePack value
        let result: DecodeResult<Probe> = codec.decode(&[0xc1, 0x00, 0x01]);
        assert!(matches!(result, Err(DecodeError::CorruptData { .. })));
    }

    #[test]
    fn should_report_type_mismatch_as_corrupt() {
        let codec = MsgPackCodec::new();
        let buffer = Codec::<String>::encode(&codec, &String::from("not a probe")).unwrap();

        let result: DecodeResult<Probe> = codec.decode(&buffer);
        assert!(matches!(result, Err(DecodeError::CorruptData { .. })));
    }
}
