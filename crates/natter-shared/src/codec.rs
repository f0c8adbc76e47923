//! Primitive field codec.
//!
//! Every field is big-endian:
//! - tag / flag: one byte
//! - integer: `u64`, 8 bytes
//! - string: `u32` length, then that many UTF-8 bytes (no terminator)
//! - blob: `u64` length, then that many bytes; a length of zero means the
//!   blob is absent and nothing follows
//!
//! There is no checksum and no version negotiation.

use bytes::BufMut;

use crate::error::CodecError;

pub fn put_u8(dst: &mut impl BufMut, value: u8) {
    dst.put_u8(value);
}

pub fn put_flag(dst: &mut impl BufMut, value: bool) {
    dst.put_u8(u8::from(value));
}

pub fn put_u64(dst: &mut impl BufMut, value: u64) {
    dst.put_u64(value);
}

pub fn put_string(dst: &mut impl BufMut, value: &str) -> Result<(), CodecError> {
    let len = u32::try_from(value.len()).map_err(|_| CodecError::FieldTooLarge {
        len: value.len() as u64,
        max: u32::MAX as usize,
    })?;
    dst.put_u32(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

/// `Some(empty)` is written exactly like `None`.
pub fn put_blob(dst: &mut impl BufMut, value: Option<&[u8]>) {
    match value {
        Some(bytes) if !bytes.is_empty() => {
            dst.put_u64(bytes.len() as u64);
            dst.put_slice(bytes);
        }
        _ => dst.put_u64(0),
    }
}

/// Cursor over a byte slice that decodes primitive fields.
///
/// Running out of input yields [`CodecError::Truncated`]; the caller
/// decides whether that means "wait for more bytes" or a broken frame.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    max_field_len: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], max_field_len: usize) -> Self {
        Self {
            data,
            pos: 0,
            max_field_len,
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn check_len(&self, len: u64) -> Result<usize, CodecError> {
        match usize::try_from(len) {
            Ok(n) if n <= self.max_field_len => Ok(n),
            _ => Err(CodecError::FieldTooLarge {
                len,
                max: self.max_field_len,
            }),
        }
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn flag(&mut self) -> Result<bool, CodecError> {
        Ok(self.u8()? != 0)
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u32()?;
        let len = self.check_len(u64::from(len))?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn blob(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        let len = self.u64()?;
        if len == 0 {
            return Ok(None);
        }
        let len = self.check_len(len)?;
        Ok(Some(self.take(len)?.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::constants::MAX_FIELD_LEN;

    fn string_round_trip(s: &str) -> String {
        let mut buf = BytesMut::new();
        put_string(&mut buf, s).unwrap();
        let mut reader = Reader::new(&buf, MAX_FIELD_LEN);
        let out = reader.string().unwrap();
        assert_eq!(reader.remaining(), 0);
        out
    }

    #[test]
    fn strings_round_trip() {
        for s in ["", "hello", "grüße, 世界 🦀", "line\nbreak\0nul"] {
            assert_eq!(string_round_trip(s), s);
        }
    }

    #[test]
    fn string_layout_is_length_prefixed() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "ab").unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn blobs_round_trip() {
        let mut buf = BytesMut::new();
        put_blob(&mut buf, Some(&[1, 2, 3]));
        put_blob(&mut buf, None);
        put_blob(&mut buf, Some(&[]));

        let mut reader = Reader::new(&buf, MAX_FIELD_LEN);
        assert_eq!(reader.blob().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(reader.blob().unwrap(), None);
        assert_eq!(reader.blob().unwrap(), None);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn absent_blob_is_eight_zero_bytes() {
        let mut buf = BytesMut::new();
        put_blob(&mut buf, None);
        assert_eq!(&buf[..], &[0u8; 8]);
    }

    #[test]
    fn short_input_is_truncated() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "hello").unwrap();
        let cut = &buf[..buf.len() - 2];

        let err = Reader::new(cut, MAX_FIELD_LEN).string().unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: 5,
                remaining: 3
            }
        );
        assert!(err.is_incomplete());
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = BytesMut::new();
        put_blob(&mut buf, Some(&[0u8; 32]));

        let err = Reader::new(&buf, 16).blob().unwrap_err();
        assert_eq!(err, CodecError::FieldTooLarge { len: 32, max: 16 });
        assert!(!err.is_incomplete());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let data = [0, 0, 0, 2, 0xff, 0xfe];
        let err = Reader::new(&data, MAX_FIELD_LEN).string().unwrap_err();
        assert_eq!(err, CodecError::InvalidUtf8);
    }

    #[test]
    fn integers_are_big_endian() {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, 0x0102_0304_0506_0708);
        assert_eq!(&buf[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(
            Reader::new(&buf, MAX_FIELD_LEN).u64().unwrap(),
            0x0102_0304_0506_0708
        );
    }
}
