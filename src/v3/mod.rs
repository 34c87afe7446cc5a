//! SNMPv3 User-based Security Model (RFC 3414, RFC 3826, RFC 7860).
//!
//! - [`auth`]: password-to-key derivation, key localization, key change, HMAC
//! - [`engine`]: engine-time cache and timeliness checks
//! - [`user`]: the user store and its persisted record format
//! - [`usm`]: inbound and outbound security processing
//! - [`report`]: usmStats counters and Report PDU construction
//!
//! Transforms are identified by [`AuthProtocol`] and [`PrivProtocol`], each
//! of which knows its OID and the digest, key and salt lengths it needs.

pub mod auth;
mod builder;
pub mod engine;
mod privacy;
pub mod report;
mod state;
pub mod user;
pub mod usm;

pub use auth::{LocalizedKey, MasterKey};
pub use builder::{
    BuildStrategy, BuiltMessage, FixedBuilder, MessageBuilder, MessageParts, Payload, ReverseBuilder,
};
pub use engine::{
    Clock, EngineTime, EngineTimeCache, LocalEngine, ManualClock, SystemClock, TimeSyncPolicy,
};
pub use privacy::{PrivKey, SaltCounter};
pub use report::{PduSummary, UsmStats};
pub use state::SecurityStateRef;
pub use user::{PasswordKind, RowStatus, StorageType, UserStore, UsmUser};
pub use usm::{OutgoingParams, ProcessedIncoming, Usm, UsmSecurityParams};

use crate::oid::Oid;

/// Replay window in seconds (RFC 3414 section 3.2 step 7).
pub const TIME_WINDOW: u32 = 150;

/// Ceiling for msgEngineBoots and msgEngineTime (2^31 - 1).
pub const MAX_ENGINE_TIME: u32 = 2_147_483_647;

/// Default msgMaxSize: the largest UDP/IPv4 payload.
pub const DEFAULT_MSG_MAX_SIZE: u32 = 65507;

/// Smallest msgMaxSize a peer may advertise (RFC 3412 section 6).
pub const MIN_MSG_MAX_SIZE: u32 = 484;

const USM_AUTH_PREFIX: [u32; 9] = [1, 3, 6, 1, 6, 3, 10, 1, 1];
const USM_PRIV_PREFIX: [u32; 9] = [1, 3, 6, 1, 6, 3, 10, 1, 2];
const BLUMENTHAL_PREFIX: [u32; 8] = [1, 3, 6, 1, 4, 1, 14832, 1];

/// Error returned when parsing a protocol name fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} protocol '{input}'")]
pub struct ParseProtocolError {
    input: String,
    kind: &'static str,
}

/// Authentication transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AuthProtocol {
    /// usmNoAuthProtocol
    #[default]
    None,
    /// HMAC-MD5-96 (RFC 3414)
    Md5,
    /// HMAC-SHA-96 (RFC 3414)
    Sha1,
    /// HMAC-SHA-224 (RFC 7860)
    Sha224,
    /// HMAC-SHA-256 (RFC 7860)
    Sha256,
    /// HMAC-SHA-384 (RFC 7860)
    Sha384,
    /// HMAC-SHA-512 (RFC 7860)
    Sha512,
}

impl std::fmt::Display for AuthProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA",
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        })
    }
}

impl std::str::FromStr for AuthProtocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" | "NOAUTH" => Ok(Self::None),
            "MD5" => Ok(Self::Md5),
            "SHA" | "SHA1" | "SHA-1" => Ok(Self::Sha1),
            "SHA224" | "SHA-224" => Ok(Self::Sha224),
            "SHA256" | "SHA-256" => Ok(Self::Sha256),
            "SHA384" | "SHA-384" => Ok(Self::Sha384),
            "SHA512" | "SHA-512" => Ok(Self::Sha512),
            _ => Err(ParseProtocolError {
                input: s.to_string(),
                kind: "authentication",
            }),
        }
    }
}

impl AuthProtocol {
    const ALL: [Self; 7] = [
        Self::None,
        Self::Md5,
        Self::Sha1,
        Self::Sha224,
        Self::Sha256,
        Self::Sha384,
        Self::Sha512,
    ];

    /// True for usmNoAuthProtocol.
    pub fn is_none(self) -> bool {
        self == Self::None
    }

    /// Digest output length; also the length of Ku and Kul. Zero for no-auth.
    pub fn digest_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Truncated MAC length carried in msgAuthenticationParameters.
    pub fn mac_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Md5 | Self::Sha1 => 12,
            Self::Sha224 => 16,
            Self::Sha256 => 24,
            Self::Sha384 => 32,
            Self::Sha512 => 48,
        }
    }

    /// Transform identifier (usmHMACMD5AuthProtocol etc).
    pub fn oid(self) -> Oid {
        let arc = match self {
            Self::None => 1,
            Self::Md5 => 2,
            Self::Sha1 => 3,
            Self::Sha224 => 4,
            Self::Sha256 => 5,
            Self::Sha384 => 6,
            Self::Sha512 => 7,
        };
        Oid::from_slice(&USM_AUTH_PREFIX).child(arc)
    }

    /// Look up a transform by identifier.
    pub fn from_oid(oid: &Oid) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.oid() == *oid)
    }

    /// Whether the localized key is long enough for `priv_protocol`.
    pub fn is_compatible_with(self, priv_protocol: PrivProtocol) -> bool {
        self.digest_len() >= priv_protocol.key_len()
    }
}

/// Privacy transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrivProtocol {
    /// usmNoPrivProtocol
    #[default]
    None,
    /// DES-CBC (RFC 3414)
    Des,
    /// AES-128-CFB (RFC 3826)
    Aes128,
    /// AES-192-CFB
    Aes192,
    /// AES-256-CFB
    Aes256,
}

impl std::fmt::Display for PrivProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Des => "DES",
            Self::Aes128 => "AES",
            Self::Aes192 => "AES-192",
            Self::Aes256 => "AES-256",
        })
    }
}

impl std::str::FromStr for PrivProtocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" | "NOPRIV" => Ok(Self::None),
            "DES" => Ok(Self::Des),
            "AES" | "AES128" | "AES-128" => Ok(Self::Aes128),
            "AES192" | "AES-192" => Ok(Self::Aes192),
            "AES256" | "AES-256" => Ok(Self::Aes256),
            _ => Err(ParseProtocolError {
                input: s.to_string(),
                kind: "privacy",
            }),
        }
    }
}

impl PrivProtocol {
    const ALL: [Self; 5] = [
        Self::None,
        Self::Des,
        Self::Aes128,
        Self::Aes192,
        Self::Aes256,
    ];

    /// True for usmNoPrivProtocol.
    pub fn is_none(self) -> bool {
        self == Self::None
    }

    /// Localized key bytes the cipher consumes. DES uses 8 key bytes plus
    /// 8 pre-IV bytes.
    pub fn key_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Des | Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Length of msgPrivacyParameters.
    pub fn salt_len(self) -> usize {
        match self {
            Self::None => 0,
            _ => 8,
        }
    }

    /// Cipher IV length.
    pub fn iv_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Des => 8,
            _ => 16,
        }
    }

    /// Transform identifier.
    pub fn oid(self) -> Oid {
        match self {
            Self::None => Oid::from_slice(&USM_PRIV_PREFIX).child(1),
            Self::Des => Oid::from_slice(&USM_PRIV_PREFIX).child(2),
            Self::Aes128 => Oid::from_slice(&USM_PRIV_PREFIX).child(4),
            Self::Aes192 => Oid::from_slice(&BLUMENTHAL_PREFIX).child(3),
            Self::Aes256 => Oid::from_slice(&BLUMENTHAL_PREFIX).child(4),
        }
    }

    /// Look up a transform by identifier.
    pub fn from_oid(oid: &Oid) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.oid() == *oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_oids() {
        assert_eq!(AuthProtocol::None.oid().to_string(), "1.3.6.1.6.3.10.1.1.1");
        assert_eq!(AuthProtocol::Md5.oid().to_string(), "1.3.6.1.6.3.10.1.1.2");
        assert_eq!(AuthProtocol::Sha1.oid().to_string(), "1.3.6.1.6.3.10.1.1.3");
        assert_eq!(AuthProtocol::Sha512.oid().to_string(), "1.3.6.1.6.3.10.1.1.7");
        assert_eq!(PrivProtocol::None.oid().to_string(), "1.3.6.1.6.3.10.1.2.1");
        assert_eq!(PrivProtocol::Des.oid().to_string(), "1.3.6.1.6.3.10.1.2.2");
        assert_eq!(PrivProtocol::Aes128.oid().to_string(), "1.3.6.1.6.3.10.1.2.4");
        assert_eq!(PrivProtocol::Aes192.oid().to_string(), "1.3.6.1.4.1.14832.1.3");
        assert_eq!(PrivProtocol::Aes256.oid().to_string(), "1.3.6.1.4.1.14832.1.4");
    }

    #[test]
    fn oid_lookup_round_trips() {
        for p in AuthProtocol::ALL {
            assert_eq!(AuthProtocol::from_oid(&p.oid()), Some(p));
        }
        for p in PrivProtocol::ALL {
            assert_eq!(PrivProtocol::from_oid(&p.oid()), Some(p));
        }
        assert_eq!(AuthProtocol::from_oid(&crate::oid!(1, 3, 6, 1, 6, 3, 10, 1, 1, 99)), None);
    }

    #[test]
    fn lengths() {
        assert_eq!(AuthProtocol::Md5.digest_len(), 16);
        assert_eq!(AuthProtocol::Sha1.digest_len(), 20);
        assert_eq!(AuthProtocol::Sha1.mac_len(), 12);
        assert_eq!(AuthProtocol::Sha256.mac_len(), 24);
        assert_eq!(AuthProtocol::None.mac_len(), 0);
        assert_eq!(PrivProtocol::Des.key_len(), 16);
        assert_eq!(PrivProtocol::Des.iv_len(), 8);
        assert_eq!(PrivProtocol::Aes128.iv_len(), 16);
        assert_eq!(PrivProtocol::Aes256.salt_len(), 8);
        assert_eq!(PrivProtocol::None.salt_len(), 0);
    }

    #[test]
    fn compatibility() {
        assert!(AuthProtocol::Md5.is_compatible_with(PrivProtocol::Des));
        assert!(AuthProtocol::Sha1.is_compatible_with(PrivProtocol::Aes128));
        assert!(!AuthProtocol::Sha1.is_compatible_with(PrivProtocol::Aes192));
        assert!(AuthProtocol::Sha224.is_compatible_with(PrivProtocol::Aes192));
        assert!(!AuthProtocol::Sha224.is_compatible_with(PrivProtocol::Aes256));
        assert!(AuthProtocol::Sha256.is_compatible_with(PrivProtocol::Aes256));
    }

    #[test]
    fn names() {
        assert_eq!("sha-1".parse::<AuthProtocol>().unwrap(), AuthProtocol::Sha1);
        assert_eq!("md5".parse::<AuthProtocol>().unwrap(), AuthProtocol::Md5);
        assert_eq!("aes".parse::<PrivProtocol>().unwrap(), PrivProtocol::Aes128);
        assert_eq!(PrivProtocol::Aes192.to_string(), "AES-192");
        let err = "bogus".parse::<AuthProtocol>().unwrap_err();
        assert_eq!(err.to_string(), "unknown authentication protocol 'bogus'");
    }
}
