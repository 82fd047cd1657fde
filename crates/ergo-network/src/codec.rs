//! Ergo P2P frame codec.
//!
//! Every frame has the following layout:
//!
//! ```text
//! +----------+----------+----------+----------+
//! |  Magic   |   Code   |  Length  | Checksum |
//! | 4 bytes  | 1 byte   | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+
//! |                 Payload                   |
//! |              (Length bytes)               |
//! +-------------------------------------------+
//! ```
//!
//! - Magic: Network identifier (mainnet/testnet)
//! - Code: Message code
//! - Length: Payload length in bytes (big-endian)
//! - Checksum: First 4 bytes of Blake2b256(payload), present only when
//!   Length is non-zero
//! - Payload: Message-specific data
//!
//! The codec stops at raw frames. Turning a frame into a [`crate::Message`]
//! is done by the [`crate::MessageRegistry`], so a payload that fails its
//! codec can be blamed on the sending peer rather than tearing down the
//! stream.

use crate::settings::NetworkSettings;
use crate::{NetworkError, MAINNET_MAGIC, MAX_MESSAGE_SIZE};
use blake2::{Blake2b, Digest};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Magic (4) + code (1) + length (4).
const HEADER_SIZE: usize = 9;

const CHECKSUM_SIZE: usize = 4;

/// Undecoded message frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub code: u8,
    pub payload: Bytes,
}

impl RawFrame {
    pub fn new(code: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }
}

/// Frame codec for Ergo P2P streams.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Network magic bytes.
    magic: [u8; 4],
    /// Maximum allowed payload size.
    max_size: usize,
}

impl FrameCodec {
    /// Create a new codec with mainnet magic.
    pub fn new() -> Self {
        Self {
            magic: MAINNET_MAGIC,
            max_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Create a codec from network settings.
    pub fn from_settings(settings: &NetworkSettings) -> Self {
        Self {
            magic: settings.magic,
            max_size: settings.max_packet_size,
        }
    }

    /// Create a codec with custom magic bytes.
    pub fn with_magic(magic: [u8; 4]) -> Self {
        Self {
            magic,
            max_size: MAX_MESSAGE_SIZE,
        }
    }

    /// First 4 bytes of Blake2b256.
    pub fn checksum(payload: &[u8]) -> [u8; 4] {
        let hash = Blake2b::<typenum::U32>::digest(payload);
        let mut checksum = [0u8; CHECKSUM_SIZE];
        checksum.copy_from_slice(&hash[..CHECKSUM_SIZE]);
        checksum
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&src[..4]);
        if magic != self.magic {
            return Err(NetworkError::MagicMismatch {
                expected: self.magic,
                got: magic,
            });
        }

        let code = src[4];
        let length = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) as usize;
        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        let body = if length == 0 { 0 } else { CHECKSUM_SIZE + length };
        let total_size = HEADER_SIZE + body;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        if length == 0 {
            return Ok(Some(RawFrame::new(code, Bytes::new())));
        }

        let mut expected = [0u8; CHECKSUM_SIZE];
        src.copy_to_slice(&mut expected);
        let payload = src.split_to(length).freeze();
        if Self::checksum(&payload) != expected {
            return Err(NetworkError::ChecksumMismatch(code));
        }

        Ok(Some(RawFrame { code, payload }))
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: RawFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = item.payload.len();
        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        dst.reserve(HEADER_SIZE + CHECKSUM_SIZE + length);
        dst.put_slice(&self.magic);
        dst.put_u8(item.code);
        dst.put_u32(length as u32);
        if length > 0 {
            dst.put_slice(&Self::checksum(&item.payload));
            dst.put_slice(&item.payload);
        }

        Ok(())
    }
}
