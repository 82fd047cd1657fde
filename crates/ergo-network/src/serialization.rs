//! Bounded binary reader and writer helpers.
//!
//! Counts and lengths are VLQ-encoded unsigned integers (7 bits per byte,
//! high bit set on every byte but the last). Heights and NiPoPow parameters
//! are 4-byte big-endian signed integers, pad lengths 2-byte big-endian
//! unsigned integers.

use crate::{NetworkError, NetworkResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Longest VLQ encoding of a `u64`.
const MAX_VLQ_LEN: usize = 10;

/// Number of bytes `value` occupies when VLQ-encoded.
pub fn vlq_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Cursor over an untrusted payload.
///
/// Every read is bounds-checked and fails with `MalformedMessage` instead of
/// panicking, naming the message being parsed.
#[derive(Debug, Clone)]
pub struct Reader {
    message: &'static str,
    buf: Bytes,
}

impl Reader {
    /// Create a reader over `buf` for the named message.
    pub fn new(message: &'static str, buf: Bytes) -> Self {
        Self { message, buf }
    }

    /// Name of the message being parsed.
    pub fn message(&self) -> &'static str {
        self.message
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Build a malformed-message error for this reader.
    pub fn malformed(&self, reason: impl Into<String>) -> NetworkError {
        NetworkError::malformed(self.message, reason)
    }

    fn require(&self, len: usize, what: &str) -> NetworkResult<()> {
        if self.buf.remaining() < len {
            return Err(self.malformed(format!(
                "truncated {}: need {} bytes, {} left",
                what,
                len,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> NetworkResult<u8> {
        self.require(1, "byte")?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u16(&mut self) -> NetworkResult<u16> {
        self.require(2, "u16")?;
        Ok(self.buf.get_u16())
    }

    pub fn get_i32(&mut self) -> NetworkResult<i32> {
        self.require(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    /// Read a VLQ-encoded unsigned integer.
    pub fn get_vlq(&mut self) -> NetworkResult<u64> {
        let mut result: u64 = 0;
        for i in 0..MAX_VLQ_LEN {
            let byte = self.get_u8()?;
            let chunk = (byte & 0x7F) as u64;
            if i == MAX_VLQ_LEN - 1 && chunk > 1 {
                return Err(self.malformed("VLQ overflow"));
            }
            result |= chunk << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(self.malformed("VLQ overflow"))
    }

    /// Read a ZigZag-then-VLQ encoded signed integer.
    pub fn get_zigzag_i64(&mut self) -> NetworkResult<i64> {
        let raw = self.get_vlq()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    /// Read a ZigZag-then-VLQ encoded `i32`.
    pub fn get_zigzag_i32(&mut self) -> NetworkResult<i32> {
        let value = self.get_zigzag_i64()?;
        i32::try_from(value).map_err(|_| self.malformed(format!("{} out of i32 range", value)))
    }

    /// Read a VLQ length and check it against what is left in the buffer.
    pub fn get_len(&mut self) -> NetworkResult<usize> {
        let len = self.get_vlq()?;
        if len > self.remaining() as u64 {
            return Err(self.malformed(format!(
                "length {} overruns remaining {} bytes",
                len,
                self.remaining()
            )));
        }
        Ok(len as usize)
    }

    /// Read `len` bytes without copying.
    pub fn get_bytes(&mut self, len: usize) -> NetworkResult<Bytes> {
        self.require(len, "byte span")?;
        Ok(self.buf.split_to(len))
    }

    /// Read a fixed-size array.
    pub fn get_array<const N: usize>(&mut self) -> NetworkResult<[u8; N]> {
        self.require(N, "fixed-length field")?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Discard `len` bytes.
    pub fn skip(&mut self, len: usize) -> NetworkResult<()> {
        self.require(len, "padding")?;
        self.buf.advance(len);
        Ok(())
    }
}

/// VLQ writes on top of `BufMut`.
pub trait VlqWrite: BufMut {
    /// Write a VLQ-encoded unsigned integer.
    fn put_vlq(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.put_u8(byte);
                break;
            }
            self.put_u8(byte | 0x80);
        }
    }

    /// Write a signed integer as ZigZag then VLQ.
    fn put_zigzag_i64(&mut self, value: i64) {
        self.put_vlq(((value << 1) ^ (value >> 63)) as u64);
    }

    /// Write a VLQ length followed by the bytes.
    fn put_len_prefixed(&mut self, data: &[u8]) {
        self.put_vlq(data.len() as u64);
        self.put_slice(data);
    }
}

impl VlqWrite for BytesMut {}
impl VlqWrite for Vec<u8> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> Reader {
        Reader::new("Test", Bytes::copy_from_slice(bytes))
    }

    #[test]
    fn test_vlq_known_encodings() {
        let mut buf = BytesMut::new();
        buf.put_vlq(0);
        buf.put_vlq(127);
        buf.put_vlq(128);
        buf.put_vlq(300);
        assert_eq!(&buf[..], &[0x00, 0x7F, 0x80, 0x01, 0xAC, 0x02]);

        let mut r = reader(&buf);
        assert_eq!(r.get_vlq().unwrap(), 0);
        assert_eq!(r.get_vlq().unwrap(), 127);
        assert_eq!(r.get_vlq().unwrap(), 128);
        assert_eq!(r.get_vlq().unwrap(), 300);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_vlq_len() {
        assert_eq!(vlq_len(0), 1);
        assert_eq!(vlq_len(127), 1);
        assert_eq!(vlq_len(128), 2);
        assert_eq!(vlq_len(16_383), 2);
        assert_eq!(vlq_len(16_384), 3);
        assert_eq!(vlq_len(u64::MAX), 10);
    }

    #[test]
    fn test_vlq_u64_max() {
        let mut buf = BytesMut::new();
        buf.put_vlq(u64::MAX);
        assert_eq!(buf.len(), 10);
        assert_eq!(reader(&buf).get_vlq().unwrap(), u64::MAX);
    }

    #[test]
    fn test_vlq_overflow_rejected() {
        let bytes = [0xFF; 11];
        assert!(reader(&bytes).get_vlq().unwrap_err().is_malformed());
    }

    #[test]
    fn test_zigzag() {
        let mut buf = BytesMut::new();
        buf.put_zigzag_i64(0);
        buf.put_zigzag_i64(-1);
        buf.put_zigzag_i64(1);
        buf.put_zigzag_i64(-64);
        assert_eq!(&buf[..], &[0x00, 0x01, 0x02, 0x7F]);

        buf.put_zigzag_i64(i64::MIN);
        buf.put_zigzag_i64(i64::from(i32::MAX) + 1);
        let mut r = reader(&buf);
        assert_eq!(r.get_zigzag_i64().unwrap(), 0);
        assert_eq!(r.get_zigzag_i32().unwrap(), -1);
        assert_eq!(r.get_zigzag_i32().unwrap(), 1);
        assert_eq!(r.get_zigzag_i32().unwrap(), -64);
        assert_eq!(r.get_zigzag_i64().unwrap(), i64::MIN);
        assert!(r.get_zigzag_i32().is_err());
    }

    #[test]
    fn test_truncated_vlq() {
        assert!(reader(&[0x80]).get_vlq().is_err());
    }

    #[test]
    fn test_length_overrun() {
        let mut r = reader(&[0x05, 1, 2, 3]);
        let err = r.get_len().unwrap_err();
        assert!(err.to_string().contains("overruns"));
    }

    #[test]
    fn test_fixed_width_reads() {
        let mut r = reader(&[0x00, 0x00, 0x00, 0x64, 0x01, 0x02, 0xAA]);
        assert_eq!(r.get_i32().unwrap(), 100);
        assert_eq!(r.get_u16().unwrap(), 0x0102);
        assert_eq!(r.get_array::<1>().unwrap(), [0xAA]);
        assert!(r.get_u8().is_err());
    }

    #[test]
    fn test_skip_past_end() {
        let mut r = reader(&[1, 2]);
        assert!(r.skip(3).is_err());
        assert!(r.skip(2).is_ok());
    }
}
