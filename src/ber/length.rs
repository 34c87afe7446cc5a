//! BER length encoding and decoding.
//!
//! Length encoding follows X.690 Section 8.1.3:
//! - Short form: Single byte, bit 8=0, value 0-127
//! - Long form: Initial byte (bit 8=1, bits 7-1=count), followed by length bytes
//! - Indefinite form (0x80): Rejected

use crate::error::{DecodeErrorKind, EncodeErrorKind, Error, Result};

/// Maximum length accepted by the decoder.
///
/// Far above any real SNMP message; a sanity cap at the BER layer.
pub const MAX_LENGTH: usize = 0x200000;

/// Encode a length, returning the bytes in reverse order (for prepending)
/// and how many of them are used.
///
/// Always the minimal form, which both message builders depend on.
pub fn encode_length(len: usize) -> ([u8; 5], usize) {
    let mut buf = [0u8; 5];

    if len <= 127 {
        buf[0] = len as u8;
        return (buf, 1);
    }

    let octets = length_len(len) - 1;
    for (i, slot) in buf.iter_mut().take(octets).enumerate() {
        *slot = (len >> (8 * i)) as u8;
    }
    buf[octets] = 0x80 | octets as u8;
    (buf, octets + 1)
}

/// Number of octets the minimal length encoding of `len` takes.
pub fn length_len(len: usize) -> usize {
    match len {
        0..=0x7F => 1,
        0x80..=0xFF => 2,
        0x100..=0xFFFF => 3,
        0x1_0000..=0xFF_FFFF => 4,
        _ => 5,
    }
}

/// Total size of a single-octet-tag TLV with `content_len` content bytes.
pub fn tlv_len(content_len: usize) -> usize {
    1 + length_len(content_len) + content_len
}

/// Write a length in forward order, checking the 4-octet limit.
pub(crate) fn write_length(out: &mut Vec<u8>, len: usize) -> Result<()> {
    if len > u32::MAX as usize {
        return Err(Error::encode(EncodeErrorKind::LengthTooLarge(len)));
    }
    let (bytes, n) = encode_length(len);
    out.extend(bytes[..n].iter().rev());
    Ok(())
}

/// Decode a length from bytes, returning (length, bytes_consumed).
///
/// `base_offset` is the absolute position of `data[0]`, used in errors.
pub fn decode_length(data: &[u8], base_offset: usize) -> Result<(usize, usize)> {
    let Some(&first) = data.first() else {
        return Err(Error::decode(base_offset, DecodeErrorKind::TruncatedData));
    };

    if first == 0x80 {
        return Err(Error::decode(base_offset, DecodeErrorKind::IndefiniteLength));
    }

    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }

    let num_octets = (first & 0x7F) as usize;
    if num_octets > 4 {
        return Err(Error::decode(
            base_offset,
            DecodeErrorKind::LengthTooLong { octets: num_octets },
        ));
    }

    let Some(octets) = data.get(1..1 + num_octets) else {
        return Err(Error::decode(base_offset, DecodeErrorKind::TruncatedData));
    };
    let len = octets.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);

    if len > MAX_LENGTH {
        return Err(Error::decode(
            base_offset,
            DecodeErrorKind::LengthExceedsMax {
                length: len,
                max: MAX_LENGTH,
            },
        ));
    }

    Ok((len, 1 + num_octets))
}
