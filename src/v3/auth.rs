//! Key derivation, key change and HMAC operations (RFC 3414).
//!
//! - Password-to-key derivation (1MB expansion + hash), producing Ku
//! - Key localization (binding Ku to an engine ID), producing Kul
//! - keyChange decoding and encoding (RFC 3414 section 5)
//! - HMAC computation and verification over whole messages

use digest::{Digest, KeyInit, Mac};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::AuthProtocol;
use crate::error::{CryptoErrorKind, Error, Result};

/// Shortest passphrase accepted for key derivation.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Bytes of cyclic passphrase expansion hashed into Ku.
const EXPANSION_SIZE: usize = 1_048_576;

/// Run `$body` with `$d` bound to the digest type of `$protocol`.
/// Evaluates to `None` for the no-auth transform.
macro_rules! with_digest {
    ($protocol:expr, $d:ident => $body:expr) => {
        match $protocol {
            AuthProtocol::None => None,
            AuthProtocol::Md5 => {
                type $d = md5::Md5;
                Some($body)
            }
            AuthProtocol::Sha1 => {
                type $d = sha1::Sha1;
                Some($body)
            }
            AuthProtocol::Sha224 => {
                type $d = sha2::Sha224;
                Some($body)
            }
            AuthProtocol::Sha256 => {
                type $d = sha2::Sha256;
                Some($body)
            }
            AuthProtocol::Sha384 => {
                type $d = sha2::Sha384;
                Some($body)
            }
            AuthProtocol::Sha512 => {
                type $d = sha2::Sha512;
                Some($body)
            }
        }
    };
}

fn unsupported() -> Box<Error> {
    tracing::debug!(target: "snmp_agent_core::usm", "keyed operation requested under usmNoAuthProtocol");
    Error::crypto(CryptoErrorKind::UnsupportedProtocol)
}

/// Master key (Ku) derived from a passphrase.
///
/// Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: AuthProtocol,
}

impl MasterKey {
    /// Derive Ku from a passphrase (RFC 3414 section A.2.1).
    ///
    /// Passphrases shorter than [`MIN_PASSWORD_LENGTH`] are rejected.
    pub fn from_password(protocol: AuthProtocol, password: &[u8]) -> Result<Self> {
        if password.len() < MIN_PASSWORD_LENGTH {
            tracing::debug!(target: "snmp_agent_core::usm", { password_len = password.len(), min_len = MIN_PASSWORD_LENGTH }, "passphrase too short");
            return Err(Error::PasswordTooShort {
                len: password.len(),
                min: MIN_PASSWORD_LENGTH,
            }
            .boxed());
        }
        let key = with_digest!(protocol, D => password_to_key::<D>(password)).ok_or_else(unsupported)?;
        Ok(Self { key, protocol })
    }

    /// Wrap an existing Ku.
    pub fn from_bytes(protocol: AuthProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    /// Localize to an engine: Kul = H(Ku || engineID || Ku).
    pub fn localize(&self, engine_id: &[u8]) -> Result<LocalizedKey> {
        localize_key(self.protocol, &self.key, engine_id)
    }

    /// The transform this key was derived under.
    pub fn protocol(&self) -> AuthProtocol {
        self.protocol
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Localized key (Kul), bound to one authoritative engine.
///
/// Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalizedKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: AuthProtocol,
}

impl LocalizedKey {
    /// Derive Kul straight from a passphrase and engine ID.
    pub fn from_password(protocol: AuthProtocol, password: &[u8], engine_id: &[u8]) -> Result<Self> {
        MasterKey::from_password(protocol, password)?.localize(engine_id)
    }

    /// Wrap an existing localized key.
    pub fn from_bytes(protocol: AuthProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    /// The transform this key belongs to.
    pub fn protocol(&self) -> AuthProtocol {
        self.protocol
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Move the key bytes out into a zeroizing buffer.
    pub fn into_bytes(self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.key.clone())
    }

    /// HMAC over `data`, truncated to the transform's MAC length.
    pub fn compute_hmac(&self, data: &[u8]) -> Result<Vec<u8>> {
        compute_hmac(self.protocol, &self.key, data)
    }

    /// Constant-time check of a truncated HMAC.
    pub fn verify_hmac(&self, data: &[u8], expected: &[u8]) -> Result<bool> {
        let computed = self.compute_hmac(data)?;
        Ok(computed.len() == expected.len() && bool::from(computed.ct_eq(expected)))
    }
}

impl std::fmt::Debug for LocalizedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalizedKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn password_to_key<D: Digest>(password: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();

    // Hash the cyclic expansion in 64-byte chunks.
    let mut buf = Zeroizing::new([0u8; 64]);
    let mut index = 0;
    let mut count = 0;
    while count < EXPANSION_SIZE {
        for byte in buf.iter_mut() {
            *byte = password[index];
            index = (index + 1) % password.len();
        }
        hasher.update(&buf[..]);
        count += 64;
    }

    hasher.finalize().to_vec()
}

fn digest_concat<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Localize a master key: Kul = H(Ku || engineID || Ku) (RFC 3414 section A.2.2).
pub fn localize_key(protocol: AuthProtocol, master_key: &[u8], engine_id: &[u8]) -> Result<LocalizedKey> {
    let key = with_digest!(protocol, D => digest_concat::<D>(&[master_key, engine_id, master_key]))
        .ok_or_else(unsupported)?;
    Ok(LocalizedKey { key, protocol })
}

/// Chain of digests the keyChange algorithm XORs against the delta:
/// `temp = H(temp || random)` per digest-sized block, starting from the old key.
fn key_change_stream(protocol: AuthProtocol, old_key: &[u8], random: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let len = old_key.len();
    let mut stream = Zeroizing::new(Vec::with_capacity(len));
    let mut temp = Zeroizing::new(old_key.to_vec());
    while stream.len() < len {
        let next = with_digest!(protocol, D => digest_concat::<D>(&[temp.as_slice(), random]))
            .ok_or_else(unsupported)?;
        temp = Zeroizing::new(next);
        let take = (len - stream.len()).min(temp.len());
        stream.extend_from_slice(&temp[..take]);
    }
    Ok(stream)
}

/// Recover a new key from a KeyChange value (RFC 3414 section 5).
///
/// `encoded` is `random || delta` and must be exactly twice the old key's
/// length.
pub fn decode_key_change(
    protocol: AuthProtocol,
    old_key: &[u8],
    encoded: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let len = old_key.len();
    if len == 0 || encoded.len() != 2 * len {
        tracing::debug!(target: "snmp_agent_core::usm", { expected = 2 * len, actual = encoded.len() }, "key change length mismatch");
        return Err(Error::KeyChangeLength {
            expected: 2 * len,
            actual: encoded.len(),
        }
        .boxed());
    }

    let (random, delta) = encoded.split_at(len);
    let stream = key_change_stream(protocol, old_key, random)?;
    Ok(Zeroizing::new(
        stream.iter().zip(delta).map(|(s, d)| s ^ d).collect(),
    ))
}

/// Produce a KeyChange value that moves `old_key` to `new_key`.
///
/// `random` must be as long as the keys; the caller supplies it so the
/// output is reproducible in tests.
pub fn encode_key_change(
    protocol: AuthProtocol,
    old_key: &[u8],
    new_key: &[u8],
    random: &[u8],
) -> Result<Vec<u8>> {
    let len = old_key.len();
    if len == 0 || new_key.len() != len || random.len() != len {
        return Err(Error::KeyChangeLength {
            expected: len,
            actual: new_key.len().max(random.len()),
        }
        .boxed());
    }

    let stream = key_change_stream(protocol, old_key, random)?;
    let mut out = Vec::with_capacity(2 * len);
    out.extend_from_slice(random);
    out.extend(stream.iter().zip(new_key).map(|(s, n)| s ^ n));
    Ok(out)
}

fn hmac_truncated<M: Mac + KeyInit>(key: &[u8], data: &[u8], len: usize) -> Result<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| {
        Error::crypto(CryptoErrorKind::InvalidKeyLength {
            expected: len,
            actual: key.len(),
        })
    })?;
    mac.update(data);
    let full = mac.finalize().into_bytes();
    Ok(full[..len].to_vec())
}

/// HMAC under `protocol`, truncated to its MAC length.
pub fn compute_hmac(protocol: AuthProtocol, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let len = protocol.mac_len();
    with_digest!(protocol, D => hmac_truncated::<hmac::Hmac<D>>(key, data, len)).ok_or_else(unsupported)?
}

/// Compute the MAC over `message` (whose auth field at `offset` is zeroed)
/// and splice it into that field.
pub(crate) fn sign_message(
    protocol: AuthProtocol,
    key: &[u8],
    message: &mut [u8],
    offset: usize,
) -> Result<()> {
    let mac = compute_hmac(protocol, key, message)?;
    let Some(field) = message.get_mut(offset..offset + mac.len()) else {
        return Err(Error::encode(crate::error::EncodeErrorKind::MissingAuthParams));
    };
    field.copy_from_slice(&mac);
    Ok(())
}

/// Verify the MAC in `message` at `offset`, hashing a copy with the field
/// zeroed.
pub(crate) fn verify_message(
    protocol: AuthProtocol,
    key: &[u8],
    message: &[u8],
    offset: usize,
) -> Result<bool> {
    let mac_len = protocol.mac_len();
    let Some(received) = message.get(offset..offset + mac_len) else {
        return Ok(false);
    };

    let mut copy = Zeroizing::new(message.to_vec());
    copy[offset..offset + mac_len].fill(0);
    let computed = compute_hmac(protocol, key, &copy)?;
    Ok(bool::from(computed.ct_eq(received)))
}
