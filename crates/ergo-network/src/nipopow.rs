//! NiPoPoW proof exchange messages.
//!
//! Both messages end with a 2-byte pad length and that many pad bytes. This
//! version always writes an empty pad and skips whatever pad a peer sends,
//! so later versions can append fields without breaking older parsers.

use crate::message_spec::MessageSpec;
use crate::serialization::{Reader, VlqWrite};
use crate::types::ModifierId;
use crate::{Message, MessageCode, NetworkResult};
use bytes::{BufMut, Bytes, BytesMut};

/// Maximum GetNipopowProof payload.
pub const MAX_NIPOPOW_REQUEST_SIZE: usize = 1_000;

/// Maximum NipopowProof payload.
pub const MAX_NIPOPOW_PROOF_SIZE: usize = 2_000_000;

/// Suffix length requested by default.
pub const DEFAULT_NIPOPOW_M: i32 = 6;

/// Security parameter requested by default.
pub const DEFAULT_NIPOPOW_K: i32 = 10;

/// Parameters of a NiPoPoW proof request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NipopowProofData {
    /// Minimal superchain length.
    pub m: i32,
    /// Suffix length.
    pub k: i32,
    /// Header the proof should be anchored at, if any.
    pub header_id: Option<ModifierId>,
}

impl NipopowProofData {
    pub fn new(m: i32, k: i32, header_id: Option<ModifierId>) -> Self {
        Self { m, k, header_id }
    }
}

impl Default for NipopowProofData {
    fn default() -> Self {
        Self::new(DEFAULT_NIPOPOW_M, DEFAULT_NIPOPOW_K, None)
    }
}

fn skip_pad(r: &mut Reader) -> NetworkResult<()> {
    if r.remaining() == 0 {
        return Ok(());
    }
    let pad = r.get_u16()? as usize;
    r.skip(pad)
}

/// GetNipopowProof codec.
#[derive(Debug, Clone, Default)]
pub struct GetNipopowProofSpec;

impl MessageSpec for GetNipopowProofSpec {
    type Payload = NipopowProofData;

    fn code(&self) -> MessageCode {
        MessageCode::GetNipopowProof
    }

    fn name(&self) -> &'static str {
        "GetNipopowProof"
    }

    fn max_size(&self) -> usize {
        MAX_NIPOPOW_REQUEST_SIZE
    }

    fn serialize(&self, payload: &NipopowProofData, w: &mut BytesMut) {
        w.put_i32(payload.m);
        w.put_i32(payload.k);
        match &payload.header_id {
            Some(id) => {
                w.put_u8(1);
                w.put_slice(id.as_ref());
            }
            None => w.put_u8(0),
        }
        w.put_u16(0);
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<NipopowProofData> {
        let m = r.get_i32()?;
        let k = r.get_i32()?;
        let header_id = match r.get_u8()? {
            0 => None,
            1 => Some(ModifierId(r.get_array()?)),
            flag => return Err(r.malformed(format!("invalid header id flag {}", flag))),
        };
        skip_pad(r)?;
        Ok(NipopowProofData { m, k, header_id })
    }

    fn wrap(payload: NipopowProofData) -> Message {
        Message::GetNipopowProof(payload)
    }

    fn payload(message: &Message) -> Option<&NipopowProofData> {
        match message {
            Message::GetNipopowProof(data) => Some(data),
            _ => None,
        }
    }
}

/// NipopowProof codec.
#[derive(Debug, Clone, Default)]
pub struct NipopowProofSpec;

impl MessageSpec for NipopowProofSpec {
    type Payload = Bytes;

    fn code(&self) -> MessageCode {
        MessageCode::NipopowProof
    }

    fn name(&self) -> &'static str {
        "NipopowProof"
    }

    fn max_size(&self) -> usize {
        MAX_NIPOPOW_PROOF_SIZE
    }

    fn serialize(&self, payload: &Bytes, w: &mut BytesMut) {
        w.put_len_prefixed(payload);
        w.put_u16(0);
    }

    fn parse(&self, r: &mut Reader) -> NetworkResult<Bytes> {
        let len = r.get_vlq()?;
        if len == 0 || len >= self.max_size() as u64 {
            return Err(r.malformed(format!("invalid proof length {}", len)));
        }
        let proof = r.get_bytes(len as usize)?;
        skip_pad(r)?;
        Ok(proof)
    }

    fn wrap(payload: Bytes) -> Message {
        Message::NipopowProof(payload)
    }

    fn payload(message: &Message) -> Option<&Bytes> {
        match message {
            Message::NipopowProof(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let data = NipopowProofData::new(6, 10, Some(ModifierId([3; 32])));
        let bytes = GetNipopowProofSpec.to_bytes(&data);
        assert_eq!(bytes.len(), 4 + 4 + 1 + 32 + 2);
        assert_eq!(&bytes[..8], &[0, 0, 0, 6, 0, 0, 0, 10]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0, 0]);
        assert_eq!(GetNipopowProofSpec.parse_bytes(bytes).unwrap(), data);
    }

    #[test]
    fn test_request_without_anchor() {
        let data = NipopowProofData::default();
        let bytes = GetNipopowProofSpec.to_bytes(&data);
        assert_eq!(bytes.len(), 4 + 4 + 1 + 2);
        assert_eq!(GetNipopowProofSpec.parse_bytes(bytes).unwrap(), data);
    }

    #[test]
    fn test_request_pad_ignored() {
        let data = NipopowProofData::new(7, 12, Some(ModifierId([8; 32])));
        let plain = GetNipopowProofSpec.to_bytes(&data);

        let mut padded = BytesMut::from(&plain[..plain.len() - 2]);
        padded.put_u16(5);
        padded.put_slice(&[0xEE; 5]);

        assert_eq!(
            GetNipopowProofSpec.parse_bytes(padded.freeze()).unwrap(),
            GetNipopowProofSpec.parse_bytes(plain).unwrap()
        );
    }

    #[test]
    fn test_request_bad_flag() {
        let mut buf = BytesMut::new();
        buf.put_i32(6);
        buf.put_i32(10);
        buf.put_u8(2);
        assert!(GetNipopowProofSpec.parse_bytes(buf.freeze()).unwrap_err().is_malformed());
    }

    #[test]
    fn test_request_pad_overrun() {
        let mut buf = BytesMut::new();
        buf.put_i32(6);
        buf.put_i32(10);
        buf.put_u8(0);
        buf.put_u16(10);
        buf.put_slice(&[0; 3]);
        assert!(GetNipopowProofSpec.parse_bytes(buf.freeze()).is_err());
    }

    #[test]
    fn test_proof_roundtrip_with_pad() {
        let proof = Bytes::from(vec![0x42; 500]);
        let bytes = NipopowProofSpec.to_bytes(&proof);
        assert_eq!(NipopowProofSpec.parse_bytes(bytes).unwrap(), proof);

        let mut padded = BytesMut::new();
        padded.put_len_prefixed(&proof);
        padded.put_u16(3);
        padded.put_slice(&[1, 2, 3]);
        assert_eq!(NipopowProofSpec.parse_bytes(padded.freeze()).unwrap(), proof);
    }

    #[test]
    fn test_proof_zero_length_rejected() {
        let bytes = Bytes::from_static(&[0, 0, 0]);
        assert!(NipopowProofSpec.parse_bytes(bytes).unwrap_err().is_malformed());
    }

    #[test]
    fn test_proof_length_at_ceiling_rejected() {
        let mut buf = BytesMut::new();
        buf.put_vlq(MAX_NIPOPOW_PROOF_SIZE as u64);
        assert!(NipopowProofSpec.parse_bytes(buf.freeze()).is_err());
    }
}
