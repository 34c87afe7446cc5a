//! Agent-side entry points.
//!
//! [`AgentConfig`] describes the local engine. [`AgentSecurityState::open`]
//! turns it into live state: the User-based Security Model (users, engine
//! times, counters) and the MIB subtree registry. The host then:
//!
//! - passes every received datagram to [`receive`](AgentSecurityState::receive)
//! - secures its answers with [`respond`](AgentSecurityState::respond)
//! - persists what [`close`](AgentSecurityState::close) returns
//!
//! All entry points take `&mut self` or `&self`; a multi-threaded host
//! serializes them behind one lock.
//!
//! # Example
//!
//! ```
//! use snmp_agent_core::agent::{AgentConfig, AgentSecurityState};
//! use snmp_agent_core::oid;
//! use snmp_agent_core::registry::RegistrationRequest;
//! use snmp_agent_core::v3::{AuthProtocol, PrivProtocol};
//!
//! # fn main() -> snmp_agent_core::Result<()> {
//! let config = AgentConfig::builder(b"\x80\x00\x1f\x88\x04agent".to_vec())
//!     .engine_boots(3)
//!     .build()?;
//! let mut agent = AgentSecurityState::open(config)?;
//!
//! agent.create_user_with_passphrases(
//!     b"admin",
//!     AuthProtocol::Sha1,
//!     b"authpassphrase",
//!     PrivProtocol::Aes128,
//!     Some(&b"privpassphrase"[..]),
//! )?;
//! agent.register("", RegistrationRequest::new("system", oid!(1, 3, 6, 1, 2, 1, 1), "system"));
//! assert_eq!(agent.resolve("", &oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)), Some(&"system"));
//!
//! let records = agent.close();
//! assert_eq!(records.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result, UsmError};
use crate::format::hex;
use crate::message::{CommunityMessage, Message, MsgFlags, MsgGlobalData, V3Message};
use crate::oid::Oid;
use crate::registry::{RangeSpec, RegistrationRequest, Registry, RegistryStatus};
use crate::v3::report::should_report;
use crate::v3::{
    AuthProtocol, BuildStrategy, Clock, DEFAULT_MSG_MAX_SIZE, LocalEngine, MAX_ENGINE_TIME,
    MIN_MSG_MAX_SIZE, OutgoingParams, PduSummary, PrivProtocol, ProcessedIncoming, SystemClock,
    TimeSyncPolicy, Usm, UsmUser,
};

/// Shortest local engine ID (RFC 3411 SnmpEngineID).
pub const MIN_ENGINE_ID_LEN: usize = 5;

/// Longest local engine ID.
pub const MAX_ENGINE_ID_LEN: usize = 32;

/// Settings of the local engine.
///
/// Build with [`AgentConfig::builder`]; deserialized values should be
/// checked with [`validate`](Self::validate).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentConfig {
    engine_id: Vec<u8>,
    engine_boots: u32,
    time_sync: TimeSyncPolicy,
    lookup_cache_size: i32,
    max_message_size: u32,
    default_auth: AuthProtocol,
    default_priv: PrivProtocol,
    build_strategy: BuildStrategy,
}

impl AgentConfig {
    /// Start a configuration for the engine `engine_id`.
    ///
    /// Defaults:
    /// - engine boots: 1
    /// - time sync policy: [`TimeSyncPolicy::Strict`]
    /// - lookup cache size: 8
    /// - msgMaxSize: 65507
    /// - initial user protocols: HMAC-MD5 and DES
    /// - build strategy: [`BuildStrategy::Reverse`]
    pub fn builder(engine_id: impl Into<Vec<u8>>) -> AgentConfigBuilder {
        AgentConfigBuilder {
            config: Self {
                engine_id: engine_id.into(),
                engine_boots: 1,
                time_sync: TimeSyncPolicy::default(),
                lookup_cache_size: crate::registry::DEFAULT_LOOKUP_CACHE_SIZE as i32,
                max_message_size: DEFAULT_MSG_MAX_SIZE,
                default_auth: AuthProtocol::Md5,
                default_priv: PrivProtocol::Des,
                build_strategy: BuildStrategy::default(),
            },
        }
    }

    pub fn engine_id(&self) -> &[u8] {
        &self.engine_id
    }

    pub fn engine_boots(&self) -> u32 {
        self.engine_boots
    }

    pub fn time_sync(&self) -> TimeSyncPolicy {
        self.time_sync
    }

    pub fn lookup_cache_size(&self) -> i32 {
        self.lookup_cache_size
    }

    pub fn max_message_size(&self) -> u32 {
        self.max_message_size
    }

    /// Transforms given to [`AgentSecurityState::create_initial_user`]
    /// when the caller does not choose.
    pub fn default_protocols(&self) -> (AuthProtocol, PrivProtocol) {
        (self.default_auth, self.default_priv)
    }

    pub fn build_strategy(&self) -> BuildStrategy {
        self.build_strategy
    }

    /// Check every setting against its allowed range.
    pub fn validate(&self) -> Result<()> {
        let len = self.engine_id.len();
        if !(MIN_ENGINE_ID_LEN..=MAX_ENGINE_ID_LEN).contains(&len) {
            return Err(Error::config(format!(
                "engine ID must be {MIN_ENGINE_ID_LEN} to {MAX_ENGINE_ID_LEN} octets, got {len}"
            )));
        }
        if self.engine_boots > MAX_ENGINE_TIME {
            return Err(Error::config(format!(
                "engine boots {} exceeds {MAX_ENGINE_TIME}",
                self.engine_boots
            )));
        }
        if !(MIN_MSG_MAX_SIZE..=i32::MAX as u32).contains(&self.max_message_size) {
            return Err(Error::config(format!(
                "msgMaxSize must be {MIN_MSG_MAX_SIZE} to {}, got {}",
                i32::MAX,
                self.max_message_size
            )));
        }
        if !self.default_priv.is_none() && self.default_auth.is_none() {
            return Err(Error::config("privacy requires an authentication protocol"));
        }
        if !self.default_auth.is_compatible_with(self.default_priv) {
            return Err(Error::config(format!(
                "{} keys are too short for {}",
                self.default_auth, self.default_priv
            )));
        }
        Ok(())
    }
}

/// Consuming builder for [`AgentConfig`].
#[derive(Debug, Clone)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    /// snmpEngineBoots at startup.
    pub fn engine_boots(mut self, boots: u32) -> Self {
        self.config.engine_boots = boots;
        self
    }

    pub fn time_sync(mut self, policy: TimeSyncPolicy) -> Self {
        self.config.time_sync = policy;
        self
    }

    /// Per-context lookup cache size; negative selects the default and
    /// zero disables the cache.
    pub fn lookup_cache_size(mut self, size: i32) -> Self {
        self.config.lookup_cache_size = size;
        self
    }

    /// Local msgMaxSize, the largest message this engine accepts.
    pub fn max_message_size(mut self, size: u32) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn default_protocols(mut self, auth: AuthProtocol, privacy: PrivProtocol) -> Self {
        self.config.default_auth = auth;
        self.config.default_priv = privacy;
        self
    }

    pub fn build_strategy(mut self, strategy: BuildStrategy) -> Self {
        self.config.build_strategy = strategy;
        self
    }

    pub fn build(self) -> Result<AgentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// What [`AgentSecurityState::receive`] made of a datagram.
#[derive(Debug)]
pub enum Inbound {
    /// SNMPv1 or SNMPv2c; no security processing applies.
    Community(CommunityMessage),
    /// An SNMPv3 message that passed USM checks.
    Secured(ProcessedIncoming),
    /// An SNMPv3 message USM rejected, with the Report to send back if one
    /// is due.
    Rejected {
        reason: UsmError,
        report: Option<Vec<u8>>,
    },
}

/// Live security and registry state of one agent.
///
/// Key material of users and of in-flight requests is zeroed when dropped.
#[derive(Debug)]
pub struct AgentSecurityState<H> {
    config: AgentConfig,
    usm: Usm,
    registry: Registry<H>,
}

impl<H> AgentSecurityState<H> {
    /// Open with the system clock.
    pub fn open(config: AgentConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Open with an explicit clock for engine time.
    pub fn open_with_clock(config: AgentConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let local = LocalEngine::new(Bytes::from(config.engine_id.clone()), config.engine_boots, clock);
        let usm = Usm::new(local, config.time_sync)?
            .with_build_strategy(config.build_strategy)
            .with_max_size(config.max_message_size);
        let mut registry = Registry::new();
        registry.set_lookup_cache_size(config.lookup_cache_size);

        tracing::debug!(
            target: "snmp_agent_core::agent",
            { snmp.engine_id = %hex::Bytes(&config.engine_id), snmp.boots = config.engine_boots },
            "security state opened"
        );
        Ok(Self {
            config,
            usm,
            registry,
        })
    }

    /// Shut down, returning the records of every nonVolatile user.
    pub fn close(self) -> Vec<String> {
        let records = self.usm.users().save_records();
        tracing::debug!(
            target: "snmp_agent_core::agent",
            { snmp.engine_id = %hex::Bytes(&self.config.engine_id), records = records.len() },
            "security state closed"
        );
        records
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn engine_id(&self) -> &[u8] {
        &self.config.engine_id
    }

    pub fn usm(&self) -> &Usm {
        &self.usm
    }

    pub fn usm_mut(&mut self) -> &mut Usm {
        &mut self.usm
    }

    pub fn registry(&self) -> &Registry<H> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry<H> {
        &mut self.registry
    }

    /// Classify a datagram and run USM on SNMPv3 messages.
    ///
    /// Framing errors are returned as `Err`. USM failures are not errors
    /// here: they come back as [`Inbound::Rejected`] along with a Report
    /// when the request earned one.
    pub fn receive(&mut self, data: Bytes) -> Result<Inbound> {
        let msg = match Message::decode(data)? {
            Message::Community(msg) => {
                tracing::trace!(target: "snmp_agent_core::agent", { version = ?msg.version }, "community message");
                return Ok(Inbound::Community(msg));
            }
            Message::V3(msg) => msg,
        };

        let err = match self.usm.process_incoming(&msg) {
            Ok(accepted) => return Ok(Inbound::Secured(accepted)),
            Err(err) => err,
        };
        let Some(reason) = err.usm_reason() else {
            return Err(err);
        };

        let summary = if msg.is_encrypted_data() {
            None
        } else {
            PduSummary::peek(&msg.data)
        };
        let report = if should_report(reason, summary.as_ref(), msg.is_reportable()) {
            let request_id = summary.map_or(0, |s| s.request_id);
            match self.usm.generate_report(&msg, Some(reason), request_id) {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::debug!(target: "snmp_agent_core::agent", { error = %e }, "report not generated");
                    None
                }
            }
        } else {
            None
        };

        tracing::debug!(
            target: "snmp_agent_core::agent",
            { snmp.msg_id = msg.msg_id(), %reason, report = report.is_some() },
            "message rejected"
        );
        Ok(Inbound::Rejected { reason, report })
    }

    /// Secure the ScopedPDU answering `request` with the request's own
    /// credentials and level.
    pub fn respond(&self, request: &ProcessedIncoming, scoped_pdu: &[u8]) -> Result<Vec<u8>> {
        let global = MsgGlobalData::new(
            request.msg_id,
            i32::try_from(self.usm.max_size()).unwrap_or(i32::MAX),
            MsgFlags::new(request.security_level, false),
        );
        self.usm.generate_outgoing(&OutgoingParams {
            global_data: &global,
            engine_id: &request.engine_id,
            user_name: &request.user_name,
            scoped_pdu,
            state: Some(&request.state),
            max_size: request.max_message_size,
        })
    }

    /// Build a Report for `msg` on request, e.g. an empty one (`reason` of
    /// `None`) answering a discovery probe that was otherwise accepted.
    pub fn report(&self, msg: &V3Message, reason: Option<UsmError>, request_id: i32) -> Result<Vec<u8>> {
        self.usm.generate_report(msg, reason, request_id)
    }

    /// Add a noAuthNoPriv user, or replace the existing one with the same
    /// key. `engine_id` of `None` means the local engine.
    pub fn create_user(&mut self, engine_id: Option<&[u8]>, name: &[u8]) -> Option<UsmUser> {
        let engine_id = Bytes::copy_from_slice(engine_id.unwrap_or(&self.config.engine_id));
        self.usm
            .users_mut()
            .add(UsmUser::new(engine_id, Bytes::copy_from_slice(name)))
    }

    /// Add a local user keyed from passphrases.
    pub fn create_user_with_passphrases(
        &mut self,
        name: &[u8],
        auth: AuthProtocol,
        auth_pass: &[u8],
        privacy: PrivProtocol,
        priv_pass: Option<&[u8]>,
    ) -> Result<()> {
        let user = UsmUser::new(Bytes::copy_from_slice(&self.config.engine_id), Bytes::copy_from_slice(name))
            .with_passphrases(auth, auth_pass, privacy, priv_pass)?;
        self.usm.users_mut().add(user);
        Ok(())
    }

    /// Add a template user for cloning, with the configured default
    /// transforms where none are given.
    pub fn create_initial_user(
        &mut self,
        name: &[u8],
        auth: Option<AuthProtocol>,
        privacy: Option<PrivProtocol>,
    ) -> Option<UsmUser> {
        let (default_auth, default_priv) = self.config.default_protocols();
        let user = UsmUser::initial(
            Bytes::copy_from_slice(&self.config.engine_id),
            Bytes::copy_from_slice(name),
            auth.unwrap_or(default_auth),
            privacy.unwrap_or(default_priv),
        );
        self.usm.users_mut().add(user)
    }

    /// Copy the transforms and keys of `source` into `target`, both given
    /// as `(engine_id, name)`.
    pub fn clone_user(&mut self, target: (&[u8], &[u8]), source: (&[u8], &[u8])) -> Result<()> {
        let users = self.usm.users_mut();
        let source = users
            .get(source.0, source.1)
            .cloned()
            .ok_or_else(|| Error::config("clone source does not exist"))?;
        let target = users
            .get_mut(target.0, target.1)
            .ok_or_else(|| Error::config("clone target does not exist"))?;
        target.clone_keys_from(&source);
        Ok(())
    }

    pub fn remove_user(&mut self, engine_id: &[u8], name: &[u8]) -> Option<UsmUser> {
        self.usm.users_mut().remove(engine_id, name)
    }

    /// Load persisted `usmUser` records. Returns how many were loaded.
    pub fn load_user_records<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) -> Result<usize> {
        let (users, times) = self.usm.users_and_times_mut();
        let mut loaded = 0;
        for line in lines {
            users.load_record(line, times)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn save_user_records(&self) -> Vec<String> {
        self.usm.users().save_records()
    }

    /// Apply a `userSet*` key directive.
    pub fn apply_password_directive(&mut self, line: &str) -> Result<usize> {
        self.usm.users_mut().apply_password_directive(line)
    }

    /// The handler answering for `oid` in `context`.
    pub fn resolve(&mut self, context: &str, oid: &Oid) -> Option<&H> {
        self.registry.resolve(context, oid)?.handler()
    }

    pub fn set_lookup_cache_size(&mut self, size: i32) {
        self.registry.set_lookup_cache_size(size);
    }
}

impl<H: Clone> AgentSecurityState<H> {
    pub fn register(&mut self, context: &str, request: RegistrationRequest<H>) -> RegistryStatus {
        self.registry.register(context, request)
    }

    pub fn unregister(
        &mut self,
        context: &str,
        root: &Oid,
        priority: u8,
        range: Option<RangeSpec>,
    ) -> RegistryStatus {
        self.registry.unregister(context, root, priority, range)
    }
}
