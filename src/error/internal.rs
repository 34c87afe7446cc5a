//! Detailed error kinds.
//!
//! These carry the precise cause of a failure. They are attached to the
//! public [`Error`](super::Error) variants and always logged through
//! `tracing` before the error is returned.

use std::fmt;

/// Structural BER decoding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeErrorKind {
    /// Tag byte did not match the expected type.
    UnexpectedTag { expected: u8, actual: u8 },
    /// Ran out of input before the TLV was complete.
    TruncatedData,
    /// Indefinite length form (0x80) is not allowed.
    IndefiniteLength,
    /// Long-form length with more octets than supported.
    LengthTooLong { octets: usize },
    /// Length exceeds the decoder's hard maximum.
    LengthExceedsMax { length: usize, max: usize },
    /// Content length runs past the enclosing buffer.
    TlvOverflow,
    /// Zero-length INTEGER.
    ZeroLengthInteger,
    /// INTEGER does not fit the target width.
    IntegerOverflow,
    /// NULL with non-zero length.
    InvalidNull,
    /// Malformed OBJECT IDENTIFIER content.
    InvalidOid,
    /// OBJECT IDENTIFIER with more arcs than allowed.
    OidTooLong { count: usize, max: usize },
    /// Constructed OCTET STRING encoding is not supported.
    ConstructedOctetString,
    /// Message version is neither v1, v2c nor v3.
    UnknownVersion(i32),
    /// msgID outside 0..=2147483647.
    InvalidMsgId(i32),
    /// msgMaxSize below the protocol minimum.
    MsgMaxSizeTooSmall { value: i32, minimum: i32 },
    /// msgFlags is not exactly one octet, or has priv without auth.
    InvalidMsgFlags,
    /// msgSecurityModel is not USM.
    UnknownSecurityModel(i32),
    /// msgEngineBoots is negative.
    InvalidEngineBoots(i32),
    /// msgEngineTime is negative.
    InvalidEngineTime(i32),
    /// Privacy parameters have the wrong framing or size.
    InvalidPrivParams,
    /// Encrypted scopedPDU was expected but plaintext was found.
    ExpectedEncryption,
    /// Plaintext scopedPDU was expected but an OCTET STRING was found.
    UnexpectedEncryption,
    /// Trailing bytes after the outermost SEQUENCE.
    TrailingData,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedTag { expected, actual } => {
                write!(f, "expected tag 0x{expected:02X}, got 0x{actual:02X}")
            }
            Self::TruncatedData => write!(f, "truncated data"),
            Self::IndefiniteLength => write!(f, "indefinite length"),
            Self::LengthTooLong { octets } => write!(f, "length uses {octets} octets"),
            Self::LengthExceedsMax { length, max } => {
                write!(f, "length {length} exceeds maximum {max}")
            }
            Self::TlvOverflow => write!(f, "TLV extends past buffer"),
            Self::ZeroLengthInteger => write!(f, "zero-length integer"),
            Self::IntegerOverflow => write!(f, "integer overflow"),
            Self::InvalidNull => write!(f, "NULL with content"),
            Self::InvalidOid => write!(f, "invalid OID encoding"),
            Self::OidTooLong { count, max } => write!(f, "OID has {count} arcs (max {max})"),
            Self::ConstructedOctetString => write!(f, "constructed OCTET STRING"),
            Self::UnknownVersion(v) => write!(f, "unknown version {v}"),
            Self::InvalidMsgId(v) => write!(f, "invalid msgID {v}"),
            Self::MsgMaxSizeTooSmall { value, minimum } => {
                write!(f, "msgMaxSize {value} below minimum {minimum}")
            }
            Self::InvalidMsgFlags => write!(f, "invalid msgFlags"),
            Self::UnknownSecurityModel(v) => write!(f, "unknown security model {v}"),
            Self::InvalidEngineBoots(v) => write!(f, "invalid engine boots {v}"),
            Self::InvalidEngineTime(v) => write!(f, "invalid engine time {v}"),
            Self::InvalidPrivParams => write!(f, "invalid privacy parameters"),
            Self::ExpectedEncryption => write!(f, "expected encrypted scopedPDU"),
            Self::UnexpectedEncryption => write!(f, "unexpected encrypted scopedPDU"),
            Self::TrailingData => write!(f, "trailing data"),
        }
    }
}

/// Encoding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EncodeErrorKind {
    /// Fixed-size output buffer is too small.
    BufferTooSmall { needed: usize, capacity: usize },
    /// Length larger than the BER encoder supports.
    LengthTooLarge(usize),
    /// The authentication parameters field could not be located.
    MissingAuthParams,
}

impl fmt::Display for EncodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { needed, capacity } => {
                write!(f, "need {needed} bytes, buffer holds {capacity}")
            }
            Self::LengthTooLarge(len) => write!(f, "length {len} too large"),
            Self::MissingAuthParams => write!(f, "auth params placeholder not found"),
        }
    }
}

/// Cryptographic setup and transform failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CryptoErrorKind {
    /// Key is shorter than the transform requires.
    InvalidKeyLength { expected: usize, actual: usize },
    /// Salt or IV has the wrong size.
    InvalidIvLength { expected: usize, actual: usize },
    /// Ciphertext is not a whole number of blocks.
    InvalidCiphertextLength { length: usize, block: usize },
    /// The transform is a no-op and cannot be used for this operation.
    UnsupportedProtocol,
    /// The OS random source failed.
    RandomSource,
    /// The cipher rejected its input.
    CipherError,
}

impl fmt::Display for CryptoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeyLength { expected, actual } => {
                write!(f, "key length {actual}, expected at least {expected}")
            }
            Self::InvalidIvLength { expected, actual } => {
                write!(f, "IV length {actual}, expected {expected}")
            }
            Self::InvalidCiphertextLength { length, block } => {
                write!(f, "ciphertext length {length} not a multiple of {block}")
            }
            Self::UnsupportedProtocol => write!(f, "unsupported protocol"),
            Self::RandomSource => write!(f, "random source failure"),
            Self::CipherError => write!(f, "cipher error"),
        }
    }
}

/// OID parsing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OidErrorKind {
    /// Empty input.
    Empty,
    /// An arc is not a valid u32.
    InvalidArc,
    /// First arc greater than 2.
    InvalidFirstArc(u32),
    /// Second arc too large for first arc 0 or 1.
    InvalidSecondArc { first: u32, second: u32 },
    /// More arcs than allowed.
    TooManyArcs { count: usize, max: usize },
}

impl fmt::Display for OidErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty OID"),
            Self::InvalidArc => write!(f, "invalid arc"),
            Self::InvalidFirstArc(v) => write!(f, "first arc {v} must be 0, 1 or 2"),
            Self::InvalidSecondArc { first, second } => {
                write!(f, "second arc {second} too large for first arc {first}")
            }
            Self::TooManyArcs { count, max } => write!(f, "{count} arcs exceeds maximum {max}"),
        }
    }
}
