//! Error types for snmp-agent-core.
//!
//! This module provides:
//!
//! - [`Error`] - The main error type
//! - [`UsmError`] - Security-processing failure reasons (RFC 3414 section 3.2)
//!
//! # Error Handling
//!
//! Errors are boxed for efficiency: `Result<T> = Result<T, Box<Error>>`.
//!
//! ```rust
//! use snmp_agent_core::{Error, Result, UsmError};
//!
//! fn handle(result: Result<()>) {
//!     match result {
//!         Ok(()) => {}
//!         Err(e) => match &*e {
//!             Error::Usm { reason: UsmError::NotInTimeWindow } => {
//!                 println!("stale message, resynchronize engine time");
//!             }
//!             Error::Usm { reason } => println!("rejected: {reason}"),
//!             _ => println!("error: {e}"),
//!         },
//!     }
//! }
//! ```

pub(crate) mod internal;

pub use internal::{CryptoErrorKind, DecodeErrorKind, EncodeErrorKind, OidErrorKind};

use crate::oid::Oid;

// Pattern for converting detailed internal errors to simplified public errors:
//
// tracing::debug!(
//     target: "snmp_agent_core::usm",
//     { snmp.engine_id = %hex::Bytes(id), snmp.user = ... },
//     "detail about the failure"
// );
// return Err(Error::usm(UsmError::UnknownSecurityName));

/// Result type alias using the library's boxed Error type.
pub type Result<T> = std::result::Result<T, Box<Error>>;

/// The main error type for all snmp-agent-core operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed BER framing.
    #[error("decode error at offset {offset}: {kind}")]
    Decode {
        offset: usize,
        kind: DecodeErrorKind,
    },

    /// Encoding failed.
    #[error("encode error: {kind}")]
    Encode { kind: EncodeErrorKind },

    /// USM security processing rejected the message.
    #[error("security processing failed: {reason}")]
    Usm { reason: UsmError },

    /// Cipher or MAC setup failed.
    #[error("crypto error: {kind}")]
    Crypto { kind: CryptoErrorKind },

    /// Passphrase shorter than the minimum for key derivation.
    #[error("passphrase too short: {len} bytes (minimum {min})")]
    PasswordTooShort { len: usize, min: usize },

    /// Encoded key-change value has the wrong length.
    #[error("key change value is {actual} bytes, expected {expected}")]
    KeyChangeLength { expected: usize, actual: usize },

    /// Persisted user record could not be parsed.
    #[error("invalid user record: {0}")]
    UserRecord(Box<str>),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(Box<str>),

    /// Invalid OID format.
    #[error("invalid OID: {0}")]
    InvalidOid(Box<str>),
}

impl Error {
    /// Box this error (convenience for constructing boxed errors).
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    /// Boxed decode error.
    pub(crate) fn decode(offset: usize, kind: DecodeErrorKind) -> Box<Self> {
        Box::new(Self::Decode { offset, kind })
    }

    /// Boxed encode error.
    pub(crate) fn encode(kind: EncodeErrorKind) -> Box<Self> {
        Box::new(Self::Encode { kind })
    }

    /// Boxed USM error.
    pub(crate) fn usm(reason: UsmError) -> Box<Self> {
        Box::new(Self::Usm { reason })
    }

    /// Boxed crypto error.
    pub(crate) fn crypto(kind: CryptoErrorKind) -> Box<Self> {
        Box::new(Self::Crypto { kind })
    }

    /// Boxed configuration error.
    pub(crate) fn config(msg: impl Into<Box<str>>) -> Box<Self> {
        Box::new(Self::Config(msg.into()))
    }

    /// The USM failure reason, if this is a security-processing error.
    pub fn usm_reason(&self) -> Option<UsmError> {
        match self {
            Self::Usm { reason } => Some(*reason),
            _ => None,
        }
    }
}

/// Why USM processing rejected a message.
///
/// Every reason except [`ParseError`](Self::ParseError),
/// [`EncryptionError`](Self::EncryptionError), [`TooLong`](Self::TooLong) and
/// [`Generic`](Self::Generic) has a usmStats counter, and a confirmed request
/// failing with one of those reasons gets a Report PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum UsmError {
    /// Authoritative engine ID not known locally.
    UnknownEngineId,
    /// No user for the (engine ID, name) pair.
    UnknownSecurityName,
    /// Requested level not supported by the user's protocols.
    UnsupportedSecurityLevel,
    /// HMAC verification failed.
    AuthenticationFailure,
    /// Boots/time outside the replay window.
    NotInTimeWindow,
    /// Decryption failed or privacy parameters malformed.
    DecryptionError,
    /// Encryption of an outgoing scopedPDU failed.
    EncryptionError,
    /// Security parameters could not be parsed.
    ParseError,
    /// Outgoing message exceeds the buffer.
    TooLong,
    /// Internal inconsistency.
    Generic,
}

impl UsmError {
    /// The usmStats counter OID (`1.3.6.1.6.3.15.1.1.N.0`) for this reason.
    pub fn stats_oid(self) -> Option<Oid> {
        let arc = match self {
            Self::UnsupportedSecurityLevel => 1,
            Self::NotInTimeWindow => 2,
            Self::UnknownSecurityName => 3,
            Self::UnknownEngineId => 4,
            Self::AuthenticationFailure => 5,
            Self::DecryptionError => 6,
            _ => return None,
        };
        Some(Oid::from_slice(&[1, 3, 6, 1, 6, 3, 15, 1, 1, arc, 0]))
    }
}

impl std::fmt::Display for UsmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownEngineId => "unknown engine ID",
            Self::UnknownSecurityName => "unknown security name",
            Self::UnsupportedSecurityLevel => "unsupported security level",
            Self::AuthenticationFailure => "authentication failure",
            Self::NotInTimeWindow => "not in time window",
            Self::DecryptionError => "decryption error",
            Self::EncryptionError => "encryption error",
            Self::ParseError => "parse error",
            Self::TooLong => "message too long",
            Self::Generic => "generic error",
        };
        f.write_str(s)
    }
}
