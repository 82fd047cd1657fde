//! Typed message codecs.
//!
//! A [`MessageSpec`] owns one message code, a name and a hard payload
//! ceiling, and converts between its typed payload and bytes. Codecs are
//! stateless apart from configured limits, so one instance can serve every
//! peer.

use crate::serialization::Reader;
use crate::{Message, MessageCode, NetworkError, NetworkResult};
use bytes::{Bytes, BytesMut};

/// Codec for a single message kind.
pub trait MessageSpec: Send + Sync {
    /// Typed payload.
    type Payload;

    fn code(&self) -> MessageCode;

    fn name(&self) -> &'static str;

    /// Largest accepted payload, in bytes.
    fn max_size(&self) -> usize;

    /// Write the payload.
    fn serialize(&self, payload: &Self::Payload, w: &mut BytesMut);

    /// Read the payload. Size ceilings are checked by [`MessageSpec::parse_bytes`]
    /// before this is called.
    fn parse(&self, r: &mut Reader) -> NetworkResult<Self::Payload>;

    /// Wrap a payload into the message enum.
    fn wrap(payload: Self::Payload) -> Message;

    /// Borrow the payload from a message of this kind.
    fn payload(message: &Message) -> Option<&Self::Payload>;

    /// Serialize into a fresh buffer.
    fn to_bytes(&self, payload: &Self::Payload) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize(payload, &mut buf);
        buf.freeze()
    }

    /// Check the ceiling and parse a whole payload.
    fn parse_bytes(&self, payload: Bytes) -> NetworkResult<Self::Payload> {
        if payload.len() > self.max_size() {
            return Err(NetworkError::MessageTooLarge {
                size: payload.len(),
                max: self.max_size(),
            });
        }
        self.parse(&mut Reader::new(self.name(), payload))
    }
}

/// Object-safe view of a [`MessageSpec`], used by the registry.
pub trait AnyMessageSpec: Send + Sync {
    /// Decode a payload into a message.
    fn decode(&self, payload: Bytes) -> NetworkResult<Message>;

    /// Encode a message owned by this codec.
    fn encode(&self, message: &Message) -> NetworkResult<Bytes>;
}

impl<S: MessageSpec> AnyMessageSpec for S {
    fn decode(&self, payload: Bytes) -> NetworkResult<Message> {
        self.parse_bytes(payload).map(S::wrap)
    }

    fn encode(&self, message: &Message) -> NetworkResult<Bytes> {
        let payload = S::payload(message).ok_or(NetworkError::CodecMismatch {
            codec: self.name(),
            got: message.name(),
        })?;
        Ok(self.to_bytes(payload))
    }
}
