//! Privacy transforms (RFC 3414 section 8, RFC 3826).
//!
//! # Salt/IV Construction
//!
//! ## DES-CBC
//! - Salt (privParameters): engineBoots (4 bytes) || counter (4 bytes)
//! - IV: pre-IV XOR salt, pre-IV being bytes 8..16 of the localized key
//!
//! ## AES-CFB
//! - Salt (privParameters): 64-bit counter
//! - IV: engineBoots (4 bytes) || engineTime (4 bytes) || salt (8 bytes)
//!   (concatenation, not XOR)

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::PrivProtocol;
use crate::error::{CryptoErrorKind, Error, Result};

const DES_BLOCK: usize = 8;

fn random_seed() -> Result<u64> {
    let mut buf = [0u8; 8];
    getrandom::fill(&mut buf).map_err(|e| {
        tracing::warn!(target: "snmp_agent_core::usm", error = %e, "OS random source unavailable");
        Error::crypto(CryptoErrorKind::RandomSource)
    })?;
    Ok(u64::from_ne_bytes(buf))
}

/// Per-engine salt counters.
///
/// DES salts consume the low 32 bits of a counter of their own; AES salts a
/// separate 64-bit counter. Both start at a random value and are bumped once
/// per encrypted message.
#[derive(Debug)]
pub struct SaltCounter {
    des: AtomicU32,
    aes: AtomicU64,
}

impl SaltCounter {
    /// Seed both counters from the OS random source.
    pub fn new() -> Result<Self> {
        let seed = random_seed()?;
        let aes = random_seed()?;
        Ok(Self::from_seed(seed as u32, aes))
    }

    /// Counters starting at fixed values. Deterministic output for tests.
    pub fn from_seed(des: u32, aes: u64) -> Self {
        Self {
            des: AtomicU32::new(des),
            aes: AtomicU64::new(aes),
        }
    }

    /// Next DES salt counter value.
    pub fn next_des(&self) -> u32 {
        self.des.fetch_add(1, Ordering::Relaxed)
    }

    /// Next AES salt value.
    pub fn next_aes(&self) -> u64 {
        self.aes.fetch_add(1, Ordering::Relaxed)
    }
}

/// Localized privacy key bound to its transform.
///
/// Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: PrivProtocol,
}

impl PrivKey {
    /// Wrap localized key bytes.
    ///
    /// The key must carry at least [`PrivProtocol::key_len`] bytes; any excess
    /// (a SHA-1 localized key used for DES, say) is ignored.
    pub fn new(protocol: PrivProtocol, key: &[u8]) -> Result<Self> {
        let needed = protocol.key_len();
        if protocol.is_none() || key.len() < needed {
            return Err(Error::crypto(CryptoErrorKind::InvalidKeyLength {
                expected: needed,
                actual: key.len(),
            }));
        }
        Ok(Self {
            key: key[..needed].to_vec(),
            protocol,
        })
    }

    /// The privacy transform.
    pub fn protocol(&self) -> PrivProtocol {
        self.protocol
    }

    /// Encrypt a scopedPDU, returning `(ciphertext, privParameters)`.
    ///
    /// DES pads the plaintext with zeros to a block boundary.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salts: &SaltCounter,
    ) -> Result<(Vec<u8>, [u8; 8])> {
        match self.protocol {
            PrivProtocol::Des => {
                let mut salt = [0u8; 8];
                salt[..4].copy_from_slice(&engine_boots.to_be_bytes());
                salt[4..].copy_from_slice(&salts.next_des().to_be_bytes());
                let ciphertext = self.des_encrypt(plaintext, &salt)?;
                Ok((ciphertext, salt))
            }
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                let salt = salts.next_aes().to_be_bytes();
                let mut buffer = plaintext.to_vec();
                self.aes_apply(&mut buffer, engine_boots, engine_time, &salt, true)?;
                Ok((buffer, salt))
            }
            PrivProtocol::None => Err(Error::crypto(CryptoErrorKind::UnsupportedProtocol)),
        }
    }

    /// Decrypt an encryptedPDU using the salt carried in privParameters.
    ///
    /// The returned plaintext is zeroed on drop.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        priv_params: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let salt: &[u8; 8] = priv_params.try_into().map_err(|_| {
            Error::crypto(CryptoErrorKind::InvalidIvLength {
                expected: 8,
                actual: priv_params.len(),
            })
        })?;

        match self.protocol {
            PrivProtocol::Des => self.des_decrypt(ciphertext, salt),
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                let mut buffer = Zeroizing::new(ciphertext.to_vec());
                self.aes_apply(&mut buffer, engine_boots, engine_time, salt, false)?;
                Ok(buffer)
            }
            PrivProtocol::None => Err(Error::crypto(CryptoErrorKind::UnsupportedProtocol)),
        }
    }

    fn des_iv(&self, salt: &[u8; 8]) -> [u8; 8] {
        let mut iv = [0u8; 8];
        for (i, byte) in iv.iter_mut().enumerate() {
            *byte = self.key[DES_BLOCK + i] ^ salt[i];
        }
        iv
    }

    fn des_encrypt(&self, plaintext: &[u8], salt: &[u8; 8]) -> Result<Vec<u8>> {
        use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
        type DesCbc = cbc::Encryptor<des::Des>;

        let padded_len = plaintext.len().div_ceil(DES_BLOCK) * DES_BLOCK;
        let mut buffer = vec![0u8; padded_len];
        buffer[..plaintext.len()].copy_from_slice(plaintext);

        let iv = self.des_iv(salt);
        let cipher = DesCbc::new_from_slices(&self.key[..DES_BLOCK], &iv)
            .map_err(|_| Error::crypto(CryptoErrorKind::CipherError))?;
        cipher
            .encrypt_padded_mut::<NoPadding>(&mut buffer, padded_len)
            .map_err(|_| Error::crypto(CryptoErrorKind::CipherError))?;
        Ok(buffer)
    }

    fn des_decrypt(&self, ciphertext: &[u8], salt: &[u8; 8]) -> Result<Zeroizing<Vec<u8>>> {
        use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
        type DesCbc = cbc::Decryptor<des::Des>;

        if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(DES_BLOCK) {
            tracing::debug!(target: "snmp_agent_core::usm", { snmp.length = ciphertext.len() }, "DES ciphertext not block aligned");
            return Err(Error::crypto(CryptoErrorKind::InvalidCiphertextLength {
                length: ciphertext.len(),
                block: DES_BLOCK,
            }));
        }

        let iv = self.des_iv(salt);
        let cipher = DesCbc::new_from_slices(&self.key[..DES_BLOCK], &iv)
            .map_err(|_| Error::crypto(CryptoErrorKind::CipherError))?;
        let mut buffer = Zeroizing::new(ciphertext.to_vec());
        cipher
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|_| Error::crypto(CryptoErrorKind::CipherError))?;
        Ok(buffer)
    }

    fn aes_apply(
        &self,
        buffer: &mut [u8],
        engine_boots: u32,
        engine_time: u32,
        salt: &[u8; 8],
        encrypt: bool,
    ) -> Result<()> {
        use aes::{Aes128, Aes192, Aes256};
        use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};

        let mut iv = [0u8; 16];
        iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
        iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
        iv[8..].copy_from_slice(salt);

        macro_rules! run {
            ($cipher:ty) => {{
                if encrypt {
                    cfb_mode::Encryptor::<$cipher>::new_from_slices(&self.key, &iv)
                        .map_err(|_| Error::crypto(CryptoErrorKind::CipherError))?
                        .encrypt(buffer);
                } else {
                    cfb_mode::Decryptor::<$cipher>::new_from_slices(&self.key, &iv)
                        .map_err(|_| Error::crypto(CryptoErrorKind::CipherError))?
                        .decrypt(buffer);
                }
            }};
        }

        match self.protocol {
            PrivProtocol::Aes128 => run!(Aes128),
            PrivProtocol::Aes192 => run!(Aes192),
            PrivProtocol::Aes256 => run!(Aes256),
            _ => return Err(Error::crypto(CryptoErrorKind::UnsupportedProtocol)),
        }
        Ok(())
    }
}

impl std::fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
