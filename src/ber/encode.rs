//! BER encoding.
//!
//! [`EncodeBuf`] builds back-to-front: children are pushed before the header
//! of the constructed type that wraps them, so lengths are always known when
//! they are written and nothing has to be shifted. Pushes happen in reverse
//! field order.

use super::length::encode_length;
use super::tag;
use crate::oid::Oid;
use bytes::Bytes;

/// Reverse BER encoding buffer.
#[derive(Debug, Default)]
pub struct EncodeBuf {
    // Bytes stored reversed; `finish` flips them.
    buf: Vec<u8>,
}

impl EncodeBuf {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    ///
    /// Also serves as a mark: content pushed when `len()` was `m` ends
    /// `m` bytes before the end of the finished output.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Prepend raw bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes.iter().rev());
    }

    /// Prepend a single byte.
    pub fn push_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Prepend a minimal length.
    pub fn push_length(&mut self, len: usize) {
        let (bytes, n) = encode_length(len);
        self.buf.extend_from_slice(&bytes[..n]);
    }

    /// Prepend a tag and length for content already pushed.
    pub fn push_header(&mut self, tag: u8, len: usize) {
        self.push_length(len);
        self.push_byte(tag);
    }

    /// Prepend a constructed TLV whose content is pushed by `f`.
    pub fn push_constructed<F>(&mut self, tag: u8, f: F)
    where
        F: FnOnce(&mut Self),
    {
        let before = self.len();
        f(self);
        let content = self.len() - before;
        self.push_header(tag, content);
    }

    /// Prepend a SEQUENCE.
    pub fn push_sequence<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Self),
    {
        self.push_constructed(tag::universal::SEQUENCE, f);
    }

    /// Prepend an OCTET STRING.
    pub fn push_octet_string(&mut self, bytes: &[u8]) {
        self.push_bytes(bytes);
        self.push_header(tag::universal::OCTET_STRING, bytes.len());
    }

    /// Prepend a signed INTEGER.
    pub fn push_integer(&mut self, value: i32) {
        let n = integer_content_len(value);
        let bytes = value.to_be_bytes();
        self.push_bytes(&bytes[4 - n..]);
        self.push_header(tag::universal::INTEGER, n);
    }

    /// Prepend an unsigned 32-bit value under `tag` (INTEGER, Counter32, ...).
    pub fn push_unsigned32(&mut self, tag: u8, value: u32) {
        let n = unsigned_content_len(value);
        let bytes = value.to_be_bytes();
        if n == 5 {
            self.push_bytes(&bytes);
            self.push_byte(0);
        } else {
            self.push_bytes(&bytes[4 - n..]);
        }
        self.push_header(tag, n);
    }

    /// Prepend a NULL.
    pub fn push_null(&mut self) {
        self.push_header(tag::universal::NULL, 0);
    }

    /// Prepend an OBJECT IDENTIFIER.
    pub fn push_oid(&mut self, oid: &Oid) {
        let content = oid.to_ber_smallvec();
        self.push_bytes(&content);
        self.push_header(tag::universal::OBJECT_IDENTIFIER, content.len());
    }

    /// Finish and return the encoded bytes in wire order.
    pub fn finish(mut self) -> Bytes {
        self.buf.reverse();
        Bytes::from(self.buf)
    }

    /// Finish into a plain vector.
    pub fn finish_vec(mut self) -> Vec<u8> {
        self.buf.reverse();
        self.buf
    }
}

/// Minimal two's-complement content length of a signed value.
pub fn integer_content_len(value: i32) -> usize {
    let bytes = value.to_be_bytes();
    let mut n = 4;
    while n > 1 {
        let lead = bytes[4 - n];
        let next = bytes[5 - n];
        let redundant = (lead == 0x00 && next & 0x80 == 0) || (lead == 0xFF && next & 0x80 != 0);
        if !redundant {
            break;
        }
        n -= 1;
    }
    n
}

/// Minimal content length of an unsigned value encoded as a BER integer.
///
/// Values with the top bit set need a leading zero octet.
pub fn unsigned_content_len(value: u32) -> usize {
    let significant = 4 - (value.leading_zeros() as usize / 8);
    let n = significant.max(1);
    if (value >> (8 * (n - 1))) & 0x80 != 0 { n + 1 } else { n }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::Decoder;
    use crate::oid;

    #[test]
    fn integer_lengths() {
        assert_eq!(integer_content_len(0), 1);
        assert_eq!(integer_content_len(127), 1);
        assert_eq!(integer_content_len(128), 2);
        assert_eq!(integer_content_len(-1), 1);
        assert_eq!(integer_content_len(-128), 1);
        assert_eq!(integer_content_len(-129), 2);
        assert_eq!(integer_content_len(i32::MAX), 4);

        assert_eq!(unsigned_content_len(0), 1);
        assert_eq!(unsigned_content_len(255), 2);
        assert_eq!(unsigned_content_len(0x7FFF_FFFF), 4);
        assert_eq!(unsigned_content_len(u32::MAX), 5);
    }

    #[test]
    fn push_integer_bytes() {
        let mut buf = EncodeBuf::new();
        buf.push_integer(128);
        assert_eq!(&buf.finish()[..], &[0x02, 0x02, 0x00, 0x80]);

        let mut buf = EncodeBuf::new();
        buf.push_unsigned32(tag::application::COUNTER32, 0xFFFF_FFFF);
        assert_eq!(&buf.finish()[..], &[0x41, 0x05, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn sequence_reads_back() {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_null();
            buf.push_oid(&oid!(1, 3, 6, 1));
            buf.push_octet_string(b"public");
            buf.push_integer(-5);
        });
        let bytes = buf.finish();

        let mut dec = Decoder::new(bytes);
        let mut seq = dec.read_sequence().unwrap();
        assert_eq!(seq.read_integer().unwrap(), -5);
        assert_eq!(&seq.read_octet_string().unwrap()[..], b"public");
        assert_eq!(seq.read_oid().unwrap(), oid!(1, 3, 6, 1));
        seq.read_null().unwrap();
        seq.finish().unwrap();
    }

    #[test]
    fn long_content_uses_long_form_length() {
        let mut buf = EncodeBuf::new();
        buf.push_octet_string(&[0xAB; 200]);
        let bytes = buf.finish();
        assert_eq!(&bytes[..3], &[0x04, 0x81, 200]);
        assert_eq!(bytes.len(), 203);
    }
}
