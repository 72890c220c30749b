//! Value encoding and the bounds-checked reader shared by all decoders.
//!
//! ```text
//! [u8 type_tag][payload]
//!   Null            -> no payload
//!   Int32/UInt32    -> 4 bytes LE
//!   Int64/UInt64    -> 8 bytes LE
//!   Double          -> 8 bytes LE (IEEE-754 bits)
//!   String/Binary   -> [u32 LE length][length bytes]
//! ```

use crate::config::WireConfig;
use crate::value::{Value, ValueType};
use crate::{ProcallError, Result};
use bytes::BufMut;

/// Append the encoding of `value` to `buf`.
///
/// Lengths are written as `u32`; callers that build whole messages check the
/// total size against [`WireConfig::MAX_FRAME_SIZE`], which keeps every
/// length well inside that range.
pub fn encode_value<B: BufMut>(value: &Value, buf: &mut B) {
    buf.put_u8(value.value_type().tag());
    match value {
        Value::Null => {}
        Value::Int32(v) => buf.put_i32_le(*v),
        Value::UInt32(v) => buf.put_u32_le(*v),
        Value::Int64(v) => buf.put_i64_le(*v),
        Value::UInt64(v) => buf.put_u64_le(*v),
        Value::Double(v) => buf.put_f64_le(*v),
        Value::String(s) => put_len_prefixed(buf, s.as_bytes()),
        Value::Binary(b) => put_len_prefixed(buf, b),
    }
}

/// Decode one value from the front of `buf`.
///
/// Returns the value and the number of bytes it occupied.
pub fn decode_value(buf: &[u8]) -> Result<(Value, usize)> {
    let mut reader = WireReader::new(buf);
    let value = reader.read_value()?;
    Ok((value, reader.position()))
}

/// Number of bytes `encode_value` produces for `value`.
pub fn encoded_len(value: &Value) -> usize {
    let payload = match value {
        Value::String(s) => 4 + s.len(),
        Value::Binary(b) => 4 + b.len(),
        other => other.value_type().fixed_width().unwrap_or(0),
    };
    1 + payload
}

pub(crate) fn put_len_prefixed<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Cursor over an untrusted byte slice.
///
/// Every read checks the remaining length first and fails with `Malformed`
/// instead of panicking or reading past the end.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(ProcallError::malformed(format!(
                "truncated {}: need {} bytes, {} remaining",
                what,
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    pub(crate) fn read_u32(&mut self, what: &str) -> Result<u32> {
        self.take_array(what).map(u32::from_le_bytes)
    }

    pub(crate) fn read_u64(&mut self, what: &str) -> Result<u64> {
        self.take_array(what).map(u64::from_le_bytes)
    }

    /// Read a `[u32 length][bytes]` block, validating the length first.
    pub(crate) fn read_len_prefixed(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.read_u32(what)? as usize;
        self.take(len, what)
    }

    pub(crate) fn read_string(&mut self, what: &str) -> Result<String> {
        let bytes = self.read_len_prefixed(what)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| ProcallError::malformed(format!("{} is not valid UTF-8: {}", what, e)))
    }

    /// Read a value count and reject counts the remaining bytes cannot hold.
    ///
    /// Each value occupies at least its tag byte, so a count larger than the
    /// remaining length is corrupt and must not drive an allocation.
    pub(crate) fn read_count(&mut self, what: &str) -> Result<usize> {
        let count = self.read_u32(what)? as usize;
        if count > WireConfig::MAX_VALUES_PER_MESSAGE {
            return Err(ProcallError::malformed(format!(
                "{} {} exceeds maximum {}",
                what,
                count,
                WireConfig::MAX_VALUES_PER_MESSAGE
            )));
        }
        if count > self.remaining() {
            return Err(ProcallError::malformed(format!(
                "{} {} exceeds remaining {} bytes",
                what,
                count,
                self.remaining()
            )));
        }
        Ok(count)
    }

    pub(crate) fn read_value(&mut self) -> Result<Value> {
        let tag = self.read_u8("value tag")?;
        let ty = ValueType::from_tag(tag)
            .ok_or_else(|| ProcallError::malformed(format!("unknown value tag {:#04x}", tag)))?;
        let value = match ty {
            ValueType::Null => Value::Null,
            ValueType::Int32 => Value::Int32(i32::from_le_bytes(self.take_array("Int32")?)),
            ValueType::UInt32 => Value::UInt32(self.read_u32("UInt32")?),
            ValueType::Int64 => Value::Int64(i64::from_le_bytes(self.take_array("Int64")?)),
            ValueType::UInt64 => Value::UInt64(self.read_u64("UInt64")?),
            ValueType::Double => Value::Double(f64::from_le_bytes(self.take_array("Double")?)),
            ValueType::String => Value::String(self.read_string("String value")?),
            ValueType::Binary => Value::Binary(self.read_len_prefixed("Binary value")?.to_vec()),
        };
        Ok(value)
    }

    pub(crate) fn read_values(&mut self, what: &str) -> Result<Vec<Value>> {
        let count = self.read_count(what)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_value()?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn sample_values() -> Vec<Value> {
        vec![
            Value::Null,
            Value::Int32(i32::MIN),
            Value::UInt32(u32::MAX),
            Value::Int64(-1),
            Value::UInt64(u64::MAX),
            Value::Double(f64::NAN),
            Value::Double(-0.0),
            Value::String(String::new()),
            Value::String("{\"enabled\":true}".into()),
            Value::String("größe".into()),
            Value::Binary(vec![]),
            Value::Binary(vec![0, 0, 0xff, 0]),
        ]
    }

    #[test]
    fn test_value_roundtrip() {
        for value in sample_values() {
            let mut buf = BytesMut::new();
            encode_value(&value, &mut buf);
            assert_eq!(buf.len(), encoded_len(&value));

            let (decoded, used) = decode_value(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(used, buf.len());
        }
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut buf = BytesMut::new();
        encode_value(&Value::UInt32(7), &mut buf);
        let encoded = buf.len();
        buf.extend_from_slice(&[0xaa, 0xbb]);

        let (decoded, used) = decode_value(&buf).unwrap();
        assert_eq!(decoded, Value::UInt32(7));
        assert_eq!(used, encoded);
    }

    #[test]
    fn test_fixed_width_little_endian() {
        let mut buf = BytesMut::new();
        encode_value(&Value::UInt32(0x0102_0304), &mut buf);
        assert_eq!(&buf[..], &[2, 4, 3, 2, 1]);
    }

    #[test]
    fn test_every_truncated_prefix_is_malformed() {
        for value in sample_values() {
            let mut buf = BytesMut::new();
            encode_value(&value, &mut buf);
            for cut in 0..buf.len() {
                let err = decode_value(&buf[..cut]).unwrap_err();
                assert!(
                    matches!(err, ProcallError::Malformed { .. }),
                    "prefix {} of {:?} gave {:?}",
                    cut,
                    value,
                    err
                );
            }
        }
    }

    #[test]
    fn test_unknown_tag_is_malformed() {
        let err = decode_value(&[0x42, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProcallError::Malformed { .. }));
    }

    #[test]
    fn test_oversized_length_is_rejected_before_reading() {
        // Binary claiming 4GB with only 3 payload bytes behind it
        let buf = [ValueType::Binary.tag(), 0xff, 0xff, 0xff, 0xff, 1, 2, 3];
        let err = decode_value(&buf).unwrap_err();
        assert!(matches!(err, ProcallError::Malformed { .. }));
    }

    #[test]
    fn test_invalid_utf8_string_is_malformed() {
        let buf = [ValueType::String.tag(), 2, 0, 0, 0, 0xc3, 0x28];
        let err = decode_value(&buf).unwrap_err();
        assert!(matches!(err, ProcallError::Malformed { .. }));
    }

    #[test]
    fn test_count_larger_than_buffer_is_rejected() {
        let buf = [0xff, 0xff, 0x00, 0x00, 0x00];
        let mut reader = WireReader::new(&buf);
        assert!(reader.read_values("arg count").is_err());
    }
}
