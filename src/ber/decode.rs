//! BER decoding.
//!
//! Zero-copy decoding using `Bytes`. Every decoder knows the absolute offset
//! of its first byte within the outermost message, so nested decoders report
//! positions that can be used to patch the original buffer.

use super::length::decode_length;
use super::tag;
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::Oid;
use bytes::Bytes;

/// BER decoder that reads from a byte buffer.
#[derive(Debug, Clone)]
pub struct Decoder {
    data: Bytes,
    offset: usize,
    base: usize,
}

impl Decoder {
    /// Create a new decoder from bytes.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            offset: 0,
            base: 0,
        }
    }

    /// Create a decoder from a byte slice (copies the data).
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    fn child(&self, data: Bytes, start: usize) -> Decoder {
        Decoder {
            data,
            offset: 0,
            base: self.base + start,
        }
    }

    #[cold]
    fn error(&self, at: usize, kind: DecodeErrorKind) -> Box<Error> {
        let offset = self.base + at;
        tracing::debug!(target: "snmp_agent_core::ber", { snmp.offset = offset, kind = %kind }, "decode error");
        Error::decode(offset, kind)
    }

    /// Offset relative to this decoder's buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Absolute offset within the outermost message.
    pub fn position(&self) -> usize {
        self.base + self.offset
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// Check if we've reached the end.
    pub fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Peek at the next tag without consuming it.
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    /// Read a tag byte.
    pub fn read_tag(&mut self) -> Result<u8> {
        let Some(&byte) = self.data.get(self.offset) else {
            return Err(self.error(self.offset, DecodeErrorKind::TruncatedData));
        };
        self.offset += 1;
        Ok(byte)
    }

    /// Read a length.
    pub fn read_length(&mut self) -> Result<usize> {
        let (len, consumed) = decode_length(self.remaining_slice(), self.position())?;
        self.offset += consumed;
        Ok(len)
    }

    /// Read raw bytes without copying.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        if self.offset.saturating_add(len) > self.data.len() {
            return Err(self.error(self.offset, DecodeErrorKind::TruncatedData));
        }
        let bytes = self.data.slice(self.offset..self.offset + len);
        self.offset += len;
        Ok(bytes)
    }

    /// Read and expect a specific tag, returning the content length.
    pub fn expect_tag(&mut self, expected: u8) -> Result<usize> {
        let at = self.offset;
        let actual = self.read_tag()?;
        if actual != expected {
            return Err(self.error(at, DecodeErrorKind::UnexpectedTag { expected, actual }));
        }
        self.read_length()
    }

    /// Read a BER INTEGER (signed, up to 32 bits).
    pub fn read_integer(&mut self) -> Result<i32> {
        let len = self.expect_tag(tag::universal::INTEGER)?;
        self.read_integer_value(len)
    }

    /// Read an INTEGER value given its length.
    ///
    /// Longer encodings are truncated to their first four octets with a
    /// warning, matching what deployed agents accept.
    pub fn read_integer_value(&mut self, len: usize) -> Result<i32> {
        if len == 0 {
            return Err(self.error(self.offset, DecodeErrorKind::ZeroLengthInteger));
        }
        if len > 4 {
            tracing::warn!(target: "snmp_agent_core::ber", { snmp.offset = self.position(), length = len }, "integer too long, truncating to 4 bytes");
        }

        let bytes = self.read_bytes(len)?;
        let mut value: i32 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
        for &byte in bytes.iter().take(4) {
            value = (value << 8) | byte as i32;
        }
        Ok(value)
    }

    /// Read an OCTET STRING.
    pub fn read_octet_string(&mut self) -> Result<Bytes> {
        let at = self.offset;
        if self.peek_tag() == Some(tag::universal::OCTET_STRING | 0x20) {
            return Err(self.error(at, DecodeErrorKind::ConstructedOctetString));
        }
        let len = self.expect_tag(tag::universal::OCTET_STRING)?;
        self.read_bytes(len)
    }

    /// Read an OCTET STRING, also returning the absolute offset of its content.
    pub fn read_octet_string_at(&mut self) -> Result<(Bytes, usize)> {
        let len = self.expect_tag(tag::universal::OCTET_STRING)?;
        let at = self.position();
        Ok((self.read_bytes(len)?, at))
    }

    /// Read a NULL.
    pub fn read_null(&mut self) -> Result<()> {
        let len = self.expect_tag(tag::universal::NULL)?;
        if len != 0 {
            return Err(self.error(self.offset, DecodeErrorKind::InvalidNull));
        }
        Ok(())
    }

    /// Read an OBJECT IDENTIFIER.
    pub fn read_oid(&mut self) -> Result<Oid> {
        let len = self.expect_tag(tag::universal::OBJECT_IDENTIFIER)?;
        let at = self.position();
        let bytes = self.read_bytes(len)?;
        Oid::from_ber(&bytes).map_err(|e| match *e {
            Error::Decode { offset, kind } => self.error(at - self.base + offset, kind),
            _ => e,
        })
    }

    /// Read a SEQUENCE, returning a decoder for its contents.
    pub fn read_sequence(&mut self) -> Result<Decoder> {
        self.read_constructed(tag::universal::SEQUENCE)
    }

    /// Read a constructed type with a specific tag, returning a decoder for its contents.
    pub fn read_constructed(&mut self, expected_tag: u8) -> Result<Decoder> {
        let len = self.expect_tag(expected_tag)?;
        let start = self.offset;
        let content = self.read_bytes(len)?;
        Ok(self.child(content, start))
    }

    /// Skip a TLV without parsing it.
    pub fn skip_tlv(&mut self) -> Result<()> {
        self.read_tag()?;
        let len = self.read_length()?;
        let new_offset = self.offset.saturating_add(len);
        if new_offset > self.data.len() {
            return Err(self.error(self.offset, DecodeErrorKind::TlvOverflow));
        }
        self.offset = new_offset;
        Ok(())
    }

    /// Read one complete TLV (header included) without parsing it.
    pub fn read_raw_tlv(&mut self) -> Result<Bytes> {
        let start = self.offset;
        self.skip_tlv()?;
        Ok(self.data.slice(start..self.offset))
    }

    /// Fail if any input remains.
    pub fn finish(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.error(self.offset, DecodeErrorKind::TrailingData))
        }
    }

    /// Get the underlying bytes for the entire buffer.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Get remaining data as a slice.
    pub fn remaining_slice(&self) -> &[u8] {
        self.data.get(self.offset..).unwrap_or(&[])
    }
}
