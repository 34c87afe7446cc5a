//! User-based Security Model processing (RFC 3414 sections 3.1 and 3.2).
//!
//! msgSecurityParameters carries a BER-encoded SEQUENCE:
//!
//! ```text
//! UsmSecurityParameters ::= SEQUENCE {
//!     msgAuthoritativeEngineID     OCTET STRING,
//!     msgAuthoritativeEngineBoots  INTEGER (0..2147483647),
//!     msgAuthoritativeEngineTime   INTEGER (0..2147483647),
//!     msgUserName                  OCTET STRING (SIZE(0..32)),
//!     msgAuthenticationParameters  OCTET STRING,
//!     msgPrivacyParameters         OCTET STRING
//! }
//! ```
//!
//! [`Usm`] owns the local engine, the user store, the engine-time cache and
//! the usmStats counters, and runs both directions of processing against
//! them.

use bytes::Bytes;

use super::auth::{sign_message, verify_message};
use super::builder::{BuildStrategy, MessageParts, Payload};
use super::engine::{EngineTimeCache, LocalEngine, TimeSyncPolicy};
use super::privacy::{PrivKey, SaltCounter};
use super::report::{UsmStats, report_scoped_pdu};
use super::state::SecurityStateRef;
use super::user::UserStore;
use super::{AuthProtocol, DEFAULT_MSG_MAX_SIZE, PrivProtocol};
use crate::ber::{Decoder, EncodeBuf, decode_length, tag};
use crate::error::{DecodeErrorKind, Error, Result, UsmError};
use crate::format::hex;
use crate::message::{MsgFlags, MsgGlobalData, SecurityLevel, V3Message};

/// Decoded USM security parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsmSecurityParams {
    pub engine_id: Bytes,
    pub engine_boots: u32,
    pub engine_time: u32,
    pub user_name: Bytes,
    pub auth_params: Bytes,
    /// Absolute offset of the `auth_params` content within the message.
    pub auth_params_offset: usize,
    pub priv_params: Bytes,
}

fn params_error(offset: usize, kind: DecodeErrorKind) -> Box<Error> {
    tracing::debug!(target: "snmp_agent_core::usm", { snmp.offset = offset, kind = %kind }, "invalid security parameters");
    Error::decode(offset, kind)
}

impl UsmSecurityParams {
    pub fn new(
        engine_id: impl Into<Bytes>,
        engine_boots: u32,
        engine_time: u32,
        user_name: impl Into<Bytes>,
    ) -> Self {
        Self {
            engine_id: engine_id.into(),
            engine_boots,
            engine_time,
            user_name: user_name.into(),
            auth_params: Bytes::new(),
            auth_params_offset: 0,
            priv_params: Bytes::new(),
        }
    }

    pub fn with_auth_params(mut self, auth_params: impl Into<Bytes>) -> Self {
        self.auth_params = auth_params.into();
        self
    }

    pub fn with_priv_params(mut self, priv_params: impl Into<Bytes>) -> Self {
        self.priv_params = priv_params.into();
        self
    }

    /// Encode the SEQUENCE (the content of msgSecurityParameters).
    pub fn encode(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_octet_string(&self.priv_params);
            buf.push_octet_string(&self.auth_params);
            buf.push_octet_string(&self.user_name);
            buf.push_unsigned32(tag::universal::INTEGER, self.engine_time);
            buf.push_unsigned32(tag::universal::INTEGER, self.engine_boots);
            buf.push_octet_string(&self.engine_id);
        });
        buf.finish()
    }

    /// Decode parameters that start at offset zero.
    pub fn decode(data: Bytes) -> Result<Self> {
        Self::decode_at(data, 0)
    }

    /// Decode parameters whose first byte sits at `offset` in the whole
    /// message.
    ///
    /// A malformed msgPrivacyParameters field is reported as
    /// [`DecodeErrorKind::InvalidPrivParams`] so it can be told apart from
    /// other framing problems.
    pub fn decode_at(data: Bytes, offset: usize) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let mut seq = decoder.read_sequence()?;

        let engine_id = seq.read_octet_string()?;

        let at = seq.position();
        let raw_boots = seq.read_integer()?;
        if raw_boots < 0 {
            return Err(params_error(offset + at, DecodeErrorKind::InvalidEngineBoots(raw_boots)));
        }

        let at = seq.position();
        let raw_time = seq.read_integer()?;
        if raw_time < 0 {
            return Err(params_error(offset + at, DecodeErrorKind::InvalidEngineTime(raw_time)));
        }

        let user_name = seq.read_octet_string()?;
        let (auth_params, auth_at) = seq.read_octet_string_at()?;

        let at = seq.position();
        let priv_params = seq
            .read_octet_string()
            .map_err(|_| params_error(offset + at, DecodeErrorKind::InvalidPrivParams))?;
        seq.finish()?;
        decoder.finish()?;

        Ok(Self {
            engine_id,
            engine_boots: raw_boots as u32,
            engine_time: raw_time as u32,
            user_name,
            auth_params,
            auth_params_offset: offset + auth_at,
            priv_params,
        })
    }
}

/// Inputs for securing one outgoing message.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingParams<'a> {
    /// msgID, msgMaxSize and msgFlags; the flags carry the security level.
    pub global_data: &'a MsgGlobalData,
    /// msgAuthoritativeEngineID.
    pub engine_id: &'a [u8],
    pub user_name: &'a [u8],
    /// The plaintext ScopedPDU TLV.
    pub scoped_pdu: &'a [u8],
    /// Credentials cached from the request being answered.
    pub state: Option<&'a SecurityStateRef>,
    /// Largest message the peer accepts.
    pub max_size: usize,
}

/// Result of accepting an incoming message.
#[derive(Debug, Clone)]
pub struct ProcessedIncoming {
    pub msg_id: i32,
    pub security_level: SecurityLevel,
    pub reportable: bool,
    pub engine_id: Bytes,
    pub user_name: Bytes,
    /// The plaintext ScopedPDU TLV.
    pub scoped_pdu: Bytes,
    /// Largest response message: the smaller of the peer's and the local
    /// msgMaxSize.
    pub max_message_size: usize,
    /// Room left for a response's ScopedPDU.
    pub max_response_size: usize,
    /// Credentials for securing the response.
    pub state: SecurityStateRef,
}

/// Effective credentials for one outgoing message.
struct Credentials<'a> {
    engine_id: &'a [u8],
    user_name: &'a [u8],
    auth_protocol: AuthProtocol,
    auth_key: &'a [u8],
    priv_protocol: PrivProtocol,
    priv_key: &'a [u8],
}

/// Length of the ScopedPDU SEQUENCE at the start of decrypted data, whose
/// tail may be cipher padding.
fn scoped_pdu_len(plaintext: &[u8]) -> Option<usize> {
    if plaintext.first() != Some(&tag::universal::SEQUENCE) {
        return None;
    }
    let (len, consumed) = decode_length(&plaintext[1..], 1).ok()?;
    let total = 1 + consumed + len;
    (total <= plaintext.len()).then_some(total)
}

fn reject(reason: UsmError) -> Box<Error> {
    Error::usm(reason)
}

/// The User-based Security Model.
#[derive(Debug)]
pub struct Usm {
    local: LocalEngine,
    users: UserStore,
    times: EngineTimeCache,
    stats: UsmStats,
    salts: SaltCounter,
    strategy: BuildStrategy,
    max_size: u32,
}

impl Usm {
    /// Fresh state for `local`, with salts seeded from the OS RNG.
    pub fn new(local: LocalEngine, policy: TimeSyncPolicy) -> Result<Self> {
        let times = EngineTimeCache::new(policy, local.clock().clone());
        Ok(Self {
            local,
            users: UserStore::new(),
            times,
            stats: UsmStats::new(),
            salts: SaltCounter::new()?,
            strategy: BuildStrategy::default(),
            max_size: DEFAULT_MSG_MAX_SIZE,
        })
    }

    pub fn with_build_strategy(mut self, strategy: BuildStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Local msgMaxSize.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_salts(mut self, salts: SaltCounter) -> Self {
        self.salts = salts;
        self
    }

    pub fn local_engine(&self) -> &LocalEngine {
        &self.local
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn users_mut(&mut self) -> &mut UserStore {
        &mut self.users
    }

    pub fn times(&self) -> &EngineTimeCache {
        &self.times
    }

    pub fn times_mut(&mut self) -> &mut EngineTimeCache {
        &mut self.times
    }

    /// Users and engine times together, for loading persisted records.
    pub fn users_and_times_mut(&mut self) -> (&mut UserStore, &mut EngineTimeCache) {
        (&mut self.users, &mut self.times)
    }

    pub fn stats(&self) -> &UsmStats {
        &self.stats
    }

    pub fn build_strategy(&self) -> BuildStrategy {
        self.strategy
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Secure an outgoing message (RFC 3414 section 3.1).
    ///
    /// Credentials come from `state` when answering a request, otherwise
    /// from the user store. A discovery probe at noAuthNoPriv needs no user
    /// at all.
    pub fn generate_outgoing(&self, params: &OutgoingParams<'_>) -> Result<Vec<u8>> {
        let level = params.global_data.msg_flags.security_level;

        let creds = match params.state {
            Some(state) => Credentials {
                engine_id: &state.engine_id,
                user_name: &state.user_name,
                auth_protocol: state.auth_protocol,
                auth_key: &state.auth_key,
                priv_protocol: state.priv_protocol,
                priv_key: &state.priv_key,
            },
            None => match self.users.get_or_default(params.engine_id, params.user_name) {
                Some(user) => Credentials {
                    engine_id: params.engine_id,
                    user_name: params.user_name,
                    auth_protocol: user.auth_protocol(),
                    auth_key: user.auth_key(),
                    priv_protocol: user.priv_protocol(),
                    priv_key: user.priv_key(),
                },
                None if level == SecurityLevel::NoAuthNoPriv => Credentials {
                    engine_id: params.engine_id,
                    user_name: params.user_name,
                    auth_protocol: AuthProtocol::None,
                    auth_key: &[],
                    priv_protocol: PrivProtocol::None,
                    priv_key: &[],
                },
                None => {
                    tracing::debug!(
                        target: "snmp_agent_core::usm",
                        { snmp.engine_id = %hex::Bytes(params.engine_id), snmp.user = %String::from_utf8_lossy(params.user_name) },
                        "no credentials for outgoing message"
                    );
                    return Err(reject(UsmError::UnknownSecurityName));
                }
            },
        };

        if (level.requires_auth() && creds.auth_protocol.is_none())
            || (level.requires_priv() && creds.priv_protocol.is_none())
        {
            tracing::debug!(
                target: "snmp_agent_core::usm",
                { snmp.user = %String::from_utf8_lossy(creds.user_name), snmp.level = ?level },
                "user cannot send at this level"
            );
            return Err(reject(UsmError::UnsupportedSecurityLevel));
        }

        let (boots, time) = if self.local.is_local(creds.engine_id) {
            self.local.boots_and_time()
        } else {
            self.times.get(creds.engine_id, false).unwrap_or((0, 0))
        };

        let mut salt = [0u8; 8];
        let ciphertext = if level.requires_priv() {
            let encrypted = PrivKey::new(creds.priv_protocol, creds.priv_key)
                .and_then(|key| key.encrypt(params.scoped_pdu, boots, time, &self.salts));
            match encrypted {
                Ok((data, used)) => {
                    salt = used;
                    Some(data)
                }
                Err(e) => {
                    tracing::debug!(target: "snmp_agent_core::usm", { error = %e }, "encryption failed");
                    return Err(reject(UsmError::EncryptionError));
                }
            }
        } else {
            None
        };

        let payload = match &ciphertext {
            Some(data) => Payload::Encrypted(data),
            None => Payload::Plain(params.scoped_pdu),
        };
        let header = params.global_data.encode_header();
        let parts = MessageParts {
            header: &header,
            engine_id: creds.engine_id,
            boots,
            time,
            user_name: creds.user_name,
            auth_len: if level.requires_auth() {
                creds.auth_protocol.mac_len()
            } else {
                0
            },
            priv_params: if level.requires_priv() { &salt[..] } else { &[] },
            payload,
        };

        let mut built = self.strategy.build(&parts, params.max_size)?;
        if level.requires_auth() {
            sign_message(creds.auth_protocol, creds.auth_key, &mut built.bytes, built.auth_offset)?;
        }

        tracing::trace!(
            target: "snmp_agent_core::usm",
            { snmp.msg_id = params.global_data.msg_id, snmp.level = ?level, len = built.bytes.len() },
            "secured outgoing message"
        );
        Ok(built.bytes)
    }

    /// Validate an incoming message (RFC 3414 section 3.2), counting any
    /// failure in [`stats`](Self::stats).
    pub fn process_incoming(&mut self, msg: &V3Message) -> Result<ProcessedIncoming> {
        let result = self.process(msg);
        if let Err(e) = &result
            && let Some(reason) = e.usm_reason()
        {
            self.stats.increment(reason);
        }
        result
    }

    fn process(&mut self, msg: &V3Message) -> Result<ProcessedIncoming> {
        let level = msg.security_level();

        let params = UsmSecurityParams::decode_at(msg.security_params.clone(), msg.security_params_offset)
            .map_err(|e| match *e {
                Error::Decode {
                    kind: DecodeErrorKind::InvalidPrivParams,
                    ..
                } => reject(UsmError::DecryptionError),
                _ => reject(UsmError::ParseError),
            })?;

        if level.requires_priv() && params.priv_params.len() != 8 {
            tracing::debug!(target: "snmp_agent_core::usm", { len = params.priv_params.len() }, "privacy parameters are not a salt");
            return Err(reject(UsmError::DecryptionError));
        }

        let engine_id = &params.engine_id;
        let authoritative = msg.is_reportable();
        let is_local = self.local.is_local(engine_id);
        if !is_local && !self.times.is_known(engine_id) {
            if authoritative {
                tracing::debug!(target: "snmp_agent_core::usm", { snmp.engine_id = %hex::Bytes(engine_id) }, "unknown engine ID");
                return Err(reject(UsmError::UnknownEngineId));
            }
            self.times.set(engine_id, 0, 0, false);
        }

        let name = params.user_name.as_ref();
        let user = if name.is_empty() && (!authoritative || level == SecurityLevel::NoAuthNoPriv) {
            self.users.get_or_default(engine_id, name)
        } else {
            self.users.get(engine_id, name)
        };
        let Some(user) = user else {
            tracing::debug!(
                target: "snmp_agent_core::usm",
                { snmp.engine_id = %hex::Bytes(engine_id), snmp.user = %String::from_utf8_lossy(name) },
                "unknown user"
            );
            return Err(reject(UsmError::UnknownSecurityName));
        };

        if !user.supports(level) {
            tracing::debug!(
                target: "snmp_agent_core::usm",
                { snmp.user = %String::from_utf8_lossy(name), snmp.level = ?level },
                "level not supported by user"
            );
            return Err(reject(UsmError::UnsupportedSecurityLevel));
        }

        let state = SecurityStateRef::from_user(user, engine_id.clone(), level);

        if level.requires_auth() {
            let expected = state.auth_protocol.mac_len();
            let verified = params.auth_params.len() == expected
                && verify_message(state.auth_protocol, &state.auth_key, &msg.raw, params.auth_params_offset)?;
            if !verified {
                tracing::debug!(
                    target: "snmp_agent_core::usm",
                    { snmp.user = %String::from_utf8_lossy(name), snmp.offset = params.auth_params_offset, len = params.auth_params.len(), expected },
                    "digest mismatch"
                );
                return Err(reject(UsmError::AuthenticationFailure));
            }

            self.times
                .check_and_update(&self.local, engine_id, params.engine_boots, params.engine_time)
                .map_err(reject)?;
        } else if self.times.policy() == TimeSyncPolicy::Opportunistic && !is_local {
            self.times
                .set(engine_id, params.engine_boots, params.engine_time, false);
        }

        let (scoped_pdu, overhead) = if level.requires_priv() {
            let mut data = Decoder::new(msg.data.clone());
            let ciphertext = data.read_octet_string().map_err(|_| {
                tracing::debug!(target: "snmp_agent_core::usm", { snmp.offset = msg.data_offset, kind = %DecodeErrorKind::ExpectedEncryption }, "msgData not encrypted");
                reject(UsmError::ParseError)
            })?;
            let header_len = msg.data.len() - ciphertext.len();

            let plaintext = PrivKey::new(state.priv_protocol, &state.priv_key)
                .and_then(|key| {
                    key.decrypt(&ciphertext, params.engine_boots, params.engine_time, &params.priv_params)
                })
                .map_err(|e| {
                    tracing::debug!(target: "snmp_agent_core::usm", { error = %e, len = ciphertext.len() }, "decryption failed");
                    reject(UsmError::DecryptionError)
                })?;
            let Some(len) = scoped_pdu_len(&plaintext) else {
                tracing::debug!(target: "snmp_agent_core::usm", { len = plaintext.len() }, "decrypted data is not a ScopedPDU");
                return Err(reject(UsmError::DecryptionError));
            };
            (Bytes::copy_from_slice(&plaintext[..len]), msg.data_offset + header_len)
        } else {
            if msg.is_encrypted_data() {
                tracing::debug!(target: "snmp_agent_core::usm", { snmp.offset = msg.data_offset, kind = %DecodeErrorKind::UnexpectedEncryption }, "encrypted msgData at a plaintext level");
                return Err(reject(UsmError::ParseError));
            }
            (msg.data.clone(), msg.data_offset)
        };

        let peer_max = usize::try_from(msg.global_data.msg_max_size).unwrap_or(0);
        let max_message_size = peer_max.min(self.max_size as usize);
        let max_response_size = max_message_size.saturating_sub(overhead);

        tracing::trace!(
            target: "snmp_agent_core::usm",
            { snmp.msg_id = msg.msg_id(), snmp.user = %String::from_utf8_lossy(name), snmp.level = ?level },
            "accepted incoming message"
        );

        Ok(ProcessedIncoming {
            msg_id: msg.msg_id(),
            security_level: level,
            reportable: msg.is_reportable(),
            engine_id: params.engine_id.clone(),
            user_name: params.user_name.clone(),
            scoped_pdu,
            max_message_size,
            max_response_size,
            state,
        })
    }

    /// Build the Report answering `msg`.
    ///
    /// `reason` names the failure whose counter is reported; `None` gives
    /// an empty Report, the reply to a successful discovery probe. Reports
    /// go out as the local engine, at authNoPriv for not-in-time-window
    /// (so the peer can trust the time it carries) and noAuthNoPriv
    /// otherwise.
    pub fn generate_report(
        &self,
        msg: &V3Message,
        reason: Option<UsmError>,
        request_id: i32,
    ) -> Result<Vec<u8>> {
        let counter = match reason {
            Some(reason) => Some(self.stats.report_varbind(reason).ok_or_else(|| reject(UsmError::Generic))?),
            None => None,
        };
        let scoped = report_scoped_pdu(self.local.engine_id(), request_id, counter.as_ref());

        let user_name = UsmSecurityParams::decode_at(msg.security_params.clone(), msg.security_params_offset)
            .map(|p| p.user_name)
            .unwrap_or_default();
        let level = if reason == Some(UsmError::NotInTimeWindow) {
            SecurityLevel::AuthNoPriv
        } else {
            SecurityLevel::NoAuthNoPriv
        };

        let global = MsgGlobalData::new(
            msg.msg_id(),
            i32::try_from(self.max_size).unwrap_or(i32::MAX),
            MsgFlags::new(level, false),
        );
        let peer_max = usize::try_from(msg.global_data.msg_max_size).unwrap_or(0);
        self.generate_outgoing(&OutgoingParams {
            global_data: &global,
            engine_id: self.local.engine_id(),
            user_name: &user_name,
            scoped_pdu: &scoped,
            state: None,
            max_size: peer_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_round_trip_with_offset() {
        let params = UsmSecurityParams::new(&b"engine-id"[..], 1234, 5678, &b"admin"[..])
            .with_auth_params(vec![0u8; 12])
            .with_priv_params(&b"priv1234"[..]);
        let encoded = params.encode();

        let decoded = UsmSecurityParams::decode_at(encoded.clone(), 40).unwrap();
        assert_eq!(decoded.engine_id.as_ref(), b"engine-id");
        assert_eq!(decoded.engine_boots, 1234);
        assert_eq!(decoded.engine_time, 5678);
        assert_eq!(decoded.user_name.as_ref(), b"admin");
        assert_eq!(decoded.priv_params.as_ref(), b"priv1234");

        let relative = decoded.auth_params_offset - 40;
        assert_eq!(&encoded[relative - 2..relative], &[0x04, 12]);
    }

    #[test]
    fn params_reject_negative_boots_and_time() {
        for (boots, time, kind) in [
            (-1, 0, DecodeErrorKind::InvalidEngineBoots(-1)),
            (0, -5, DecodeErrorKind::InvalidEngineTime(-5)),
        ] {
            let mut buf = EncodeBuf::new();
            buf.push_sequence(|buf| {
                buf.push_octet_string(&[]);
                buf.push_octet_string(&[]);
                buf.push_octet_string(&[]);
                buf.push_integer(time);
                buf.push_integer(boots);
                buf.push_octet_string(&[]);
            });
            let err = UsmSecurityParams::decode(buf.finish()).unwrap_err();
            assert!(matches!(*err, Error::Decode { kind: ref k, .. } if *k == kind));
        }
    }

    #[test]
    fn malformed_priv_params_are_distinguished() {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_integer(7);
            buf.push_octet_string(&[]);
            buf.push_octet_string(b"user");
            buf.push_integer(0);
            buf.push_integer(0);
            buf.push_octet_string(b"eng");
        });
        let err = UsmSecurityParams::decode(buf.finish()).unwrap_err();
        assert!(matches!(
            *err,
            Error::Decode {
                kind: DecodeErrorKind::InvalidPrivParams,
                ..
            }
        ));
    }

    #[test]
    fn scoped_pdu_length_ignores_padding() {
        let padded = [0x30, 0x03, 0x04, 0x01, 0x61, 0x00, 0x00, 0x00];
        assert_eq!(scoped_pdu_len(&padded), Some(5));
        assert_eq!(scoped_pdu_len(&[0x30, 0x09, 0x00]), None);
        assert_eq!(scoped_pdu_len(&[0x04, 0x00]), None);
        assert_eq!(scoped_pdu_len(&[]), None);
    }
}
