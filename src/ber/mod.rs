//! BER (Basic Encoding Rules) collaborator.
//!
//! Only the subset the security layer needs: INTEGER, OCTET STRING, NULL,
//! OBJECT IDENTIFIER, SEQUENCE and context/application tags. Decoding is
//! zero-copy over [`bytes::Bytes`] and tracks absolute offsets so callers can
//! locate fields (such as `msgAuthenticationParameters`) inside the whole
//! message. Encoding builds back-to-front.

mod decode;
mod encode;
mod length;
pub mod tag;

pub use decode::Decoder;
pub use encode::{EncodeBuf, integer_content_len, unsigned_content_len};
pub use length::{MAX_LENGTH, decode_length, encode_length, length_len, tlv_len};
pub(crate) use length::write_length;
