//! The USM user table (RFC 3414 section 5) and its persisted form.
//!
//! Users are kept sorted by `(engineID length, engineID, name length, name)`,
//! the index order of usmUserTable, so a GetNext over the table is a walk of
//! the list. Adding a user whose key already exists replaces the old entry.
//!
//! Keys held by a user are already localized to its engine ID.

use std::cmp::Ordering;

use bytes::Bytes;
use zeroize::Zeroizing;

use super::auth::{MasterKey, localize_key};
use super::engine::EngineTimeCache;
use super::{AuthProtocol, PrivProtocol};
use crate::error::{Error, Result};
use crate::format::{config, hex};
use crate::message::SecurityLevel;
use crate::oid::Oid;

/// usmUserSecurityName column; clone-from row pointers point into it.
const USM_USER_SECURITY_NAME: [u32; 11] = [1, 3, 6, 1, 6, 3, 15, 1, 2, 2, 1];
const SECURITY_NAME_COLUMN: u32 = 3;

/// Leading token of a persisted user record.
pub const RECORD_TOKEN: &str = "usmUser";

/// SNMPv2 RowStatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RowStatus {
    #[default]
    Active,
    NotInService,
    NotReady,
    CreateAndGo,
    CreateAndWait,
    Destroy,
}

impl RowStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Active => 1,
            Self::NotInService => 2,
            Self::NotReady => 3,
            Self::CreateAndGo => 4,
            Self::CreateAndWait => 5,
            Self::Destroy => 6,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            1 => Self::Active,
            2 => Self::NotInService,
            3 => Self::NotReady,
            4 => Self::CreateAndGo,
            5 => Self::CreateAndWait,
            6 => Self::Destroy,
            _ => return None,
        })
    }
}

/// SNMPv2 StorageType.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StorageType {
    Other,
    Volatile,
    #[default]
    NonVolatile,
    Permanent,
    ReadOnly,
}

impl StorageType {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Other => 1,
            Self::Volatile => 2,
            Self::NonVolatile => 3,
            Self::Permanent => 4,
            Self::ReadOnly => 5,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            1 => Self::Other,
            2 => Self::Volatile,
            3 => Self::NonVolatile,
            4 => Self::Permanent,
            5 => Self::ReadOnly,
            _ => return None,
        })
    }
}

/// How the value handed to [`UserStore::set_password`] is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordKind {
    /// Passphrase for the auth key (`userSetAuthPass`).
    AuthPassphrase,
    /// Passphrase for the privacy key (`userSetPrivPass`).
    PrivPassphrase,
    /// Master key Ku for the auth key (`userSetAuthKey`).
    AuthMasterKey,
    /// Master key Ku for the privacy key (`userSetPrivKey`).
    PrivMasterKey,
    /// Already localized auth key (`userSetAuthLocalKey`).
    AuthLocalizedKey,
    /// Already localized privacy key (`userSetPrivLocalKey`).
    PrivLocalizedKey,
}

impl PasswordKind {
    /// Directive name for this kind.
    pub fn token(self) -> &'static str {
        match self {
            Self::AuthPassphrase => "userSetAuthPass",
            Self::PrivPassphrase => "userSetPrivPass",
            Self::AuthMasterKey => "userSetAuthKey",
            Self::PrivMasterKey => "userSetPrivKey",
            Self::AuthLocalizedKey => "userSetAuthLocalKey",
            Self::PrivLocalizedKey => "userSetPrivLocalKey",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        [
            Self::AuthPassphrase,
            Self::PrivPassphrase,
            Self::AuthMasterKey,
            Self::PrivMasterKey,
            Self::AuthLocalizedKey,
            Self::PrivLocalizedKey,
        ]
        .into_iter()
        .find(|k| k.token() == token)
    }

    fn is_priv(self) -> bool {
        matches!(
            self,
            Self::PrivPassphrase | Self::PrivMasterKey | Self::PrivLocalizedKey
        )
    }
}

/// One row of the user table.
#[derive(Clone)]
pub struct UsmUser {
    engine_id: Bytes,
    name: Bytes,
    sec_name: Bytes,
    clone_from: Oid,
    auth_protocol: AuthProtocol,
    auth_key: Zeroizing<Vec<u8>>,
    priv_protocol: PrivProtocol,
    priv_key: Zeroizing<Vec<u8>>,
    public_string: Bytes,
    status: RowStatus,
    storage: StorageType,
}

impl UsmUser {
    /// A user with no authentication or privacy, active and nonVolatile.
    /// The security name starts out equal to the user name.
    pub fn new(engine_id: impl Into<Bytes>, name: impl Into<Bytes>) -> Self {
        let name = name.into();
        Self {
            engine_id: engine_id.into(),
            sec_name: name.clone(),
            name,
            clone_from: Oid::empty(),
            auth_protocol: AuthProtocol::None,
            auth_key: Zeroizing::new(Vec::new()),
            priv_protocol: PrivProtocol::None,
            priv_key: Zeroizing::new(Vec::new()),
            public_string: Bytes::new(),
            status: RowStatus::Active,
            storage: StorageType::NonVolatile,
        }
    }

    /// A template user as RFC 3414 appendix A.1 describes: readOnly storage,
    /// cloneFrom `.0.0` and the given transforms with no keys yet.
    pub fn initial(
        engine_id: impl Into<Bytes>,
        name: impl Into<Bytes>,
        auth_protocol: AuthProtocol,
        priv_protocol: PrivProtocol,
    ) -> Self {
        let mut user = Self::new(engine_id, name);
        user.clone_from = Oid::from_slice(&[0, 0]);
        user.auth_protocol = auth_protocol;
        user.priv_protocol = priv_protocol;
        user.storage = StorageType::ReadOnly;
        user
    }

    /// Set the auth transform and its localized key.
    pub fn with_auth(mut self, protocol: AuthProtocol, localized_key: &[u8]) -> Self {
        self.auth_protocol = protocol;
        self.auth_key = Zeroizing::new(localized_key.to_vec());
        self
    }

    /// Set the privacy transform and its localized key.
    pub fn with_priv(mut self, protocol: PrivProtocol, localized_key: &[u8]) -> Self {
        self.priv_protocol = protocol;
        self.priv_key = clamp_priv_key(protocol, localized_key);
        self
    }

    /// Derive and localize both keys from passphrases under `auth`.
    ///
    /// The privacy key is localized with the auth transform's hash, as
    /// RFC 3414 and RFC 3826 require.
    pub fn with_passphrases(
        mut self,
        auth: AuthProtocol,
        auth_pass: &[u8],
        privacy: PrivProtocol,
        priv_pass: Option<&[u8]>,
    ) -> Result<Self> {
        self.auth_protocol = auth;
        let ku = MasterKey::from_password(auth, auth_pass)?;
        self.auth_key = ku.localize(&self.engine_id)?.into_bytes();
        if let Some(priv_pass) = priv_pass {
            let ku = MasterKey::from_password(auth, priv_pass)?;
            self.priv_protocol = privacy;
            self.priv_key = clamp_priv_key(privacy, ku.localize(&self.engine_id)?.as_bytes());
        }
        Ok(self)
    }

    pub fn with_storage(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_status(mut self, status: RowStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_sec_name(mut self, sec_name: impl Into<Bytes>) -> Self {
        self.sec_name = sec_name.into();
        self
    }

    pub fn with_public_string(mut self, public: impl Into<Bytes>) -> Self {
        self.public_string = public.into();
        self
    }

    pub fn engine_id(&self) -> &Bytes {
        &self.engine_id
    }

    pub fn name(&self) -> &Bytes {
        &self.name
    }

    pub fn sec_name(&self) -> &Bytes {
        &self.sec_name
    }

    pub fn clone_from_oid(&self) -> &Oid {
        &self.clone_from
    }

    pub fn auth_protocol(&self) -> AuthProtocol {
        self.auth_protocol
    }

    pub fn auth_key(&self) -> &[u8] {
        &self.auth_key
    }

    pub fn priv_protocol(&self) -> PrivProtocol {
        self.priv_protocol
    }

    pub fn priv_key(&self) -> &[u8] {
        &self.priv_key
    }

    pub fn public_string(&self) -> &Bytes {
        &self.public_string
    }

    pub fn status(&self) -> RowStatus {
        self.status
    }

    pub fn storage(&self) -> StorageType {
        self.storage
    }

    /// Whether this user's transforms can carry `level`.
    pub fn supports(&self, level: SecurityLevel) -> bool {
        (!level.requires_auth() || !self.auth_protocol.is_none())
            && (!level.requires_priv() || !self.priv_protocol.is_none())
    }

    /// Take `source`'s transforms and keys (usmUserCloneFrom).
    pub fn clone_keys_from(&mut self, source: &UsmUser) {
        self.auth_protocol = source.auth_protocol;
        self.auth_key = source.auth_key.clone();
        self.priv_protocol = source.priv_protocol;
        self.priv_key = source.priv_key.clone();
        self.clone_from = source.row_pointer();
    }

    /// RowPointer to this user's usmUserSecurityName instance.
    pub fn row_pointer(&self) -> Oid {
        let mut arcs = USM_USER_SECURITY_NAME.to_vec();
        arcs.push(SECURITY_NAME_COLUMN);
        arcs.push(self.engine_id.len() as u32);
        arcs.extend(self.engine_id.iter().map(|&b| u32::from(b)));
        arcs.push(self.name.len() as u32);
        arcs.extend(self.name.iter().map(|&b| u32::from(b)));
        Oid::new(arcs)
    }

    fn sort_key(&self) -> (usize, &[u8], usize, &[u8]) {
        (
            self.engine_id.len(),
            self.engine_id.as_ref(),
            self.name.len(),
            self.name.as_ref(),
        )
    }

    fn cmp_key(&self, engine_id: &[u8], name: &[u8]) -> Ordering {
        self.sort_key()
            .cmp(&(engine_id.len(), engine_id, name.len(), name))
    }

    /// Render this user as one persisted record line.
    pub fn to_record(&self) -> String {
        [
            RECORD_TOKEN.to_string(),
            self.status.as_i32().to_string(),
            self.storage.as_i32().to_string(),
            config::write_octets(&self.engine_id),
            config::write_octets(&self.name),
            config::write_octets(&self.sec_name),
            self.clone_from.to_config_string(),
            self.auth_protocol.oid().to_config_string(),
            config::write_octets(&self.auth_key),
            self.priv_protocol.oid().to_config_string(),
            config::write_octets(&self.priv_key),
            config::write_octets(&self.public_string),
        ]
        .join(" ")
    }

    /// Parse a record produced by [`to_record`](Self::to_record). The leading
    /// `usmUser` token is optional.
    ///
    /// A privacy key longer than its transform uses is clamped. Names with a
    /// trailing NUL, as some writers persist them, have it removed.
    pub fn from_record(line: &str) -> Result<Self> {
        let mut tokens = config::tokenize(line);
        if tokens.first().map(String::as_str) == Some(RECORD_TOKEN) {
            tokens.remove(0);
        }
        if tokens.len() != 11 {
            return Err(record_error(format!("expected 11 fields, found {}", tokens.len())));
        }

        let status = tokens[0]
            .parse()
            .ok()
            .and_then(RowStatus::from_i32)
            .ok_or_else(|| record_error(format!("bad status '{}'", tokens[0])))?;
        let storage = tokens[1]
            .parse()
            .ok()
            .and_then(StorageType::from_i32)
            .ok_or_else(|| record_error(format!("bad storage type '{}'", tokens[1])))?;
        let octets = |i: usize, field: &str| {
            config::read_octets(&tokens[i]).map_err(|e| record_error(format!("{field}: {e}")))
        };
        let oid = |i: usize, field: &str| {
            Oid::from_config_str(&tokens[i]).map_err(|e| record_error(format!("{field}: {e}")))
        };

        let engine_id = octets(2, "engineID")?;
        let name = strip_nul(&tokens[3], octets(3, "name")?);
        let sec_name = strip_nul(&tokens[4], octets(4, "secName")?);
        let clone_from = oid(5, "cloneFrom")?;
        let auth_oid = oid(6, "authProtocol")?;
        let auth_protocol = if auth_oid.is_empty() {
            AuthProtocol::None
        } else {
            AuthProtocol::from_oid(&auth_oid)
                .ok_or_else(|| record_error(format!("unknown auth transform {auth_oid}")))?
        };
        let auth_key = Zeroizing::new(octets(7, "authKey")?);
        let priv_oid = oid(8, "privProtocol")?;
        let priv_protocol = if priv_oid.is_empty() {
            PrivProtocol::None
        } else {
            PrivProtocol::from_oid(&priv_oid)
                .ok_or_else(|| record_error(format!("unknown privacy transform {priv_oid}")))?
        };
        let priv_key = clamp_priv_key(priv_protocol, &Zeroizing::new(octets(9, "privKey")?));
        let public_string = octets(10, "public")?;

        Ok(Self {
            engine_id: engine_id.into(),
            name: name.into(),
            sec_name: sec_name.into(),
            clone_from,
            auth_protocol,
            auth_key,
            priv_protocol,
            priv_key,
            public_string: public_string.into(),
            status,
            storage,
        })
    }
}

/// Privacy keys keep only the bytes their cipher consumes, so a key
/// localized under a longer hash reads back the same after persistence.
fn clamp_priv_key(protocol: PrivProtocol, key: &[u8]) -> Zeroizing<Vec<u8>> {
    let len = key.len().min(protocol.key_len());
    Zeroizing::new(key[..len].to_vec())
}

/// Text tokens may carry a C-style terminator; hex tokens are taken as
/// written.
fn strip_nul(token: &str, mut bytes: Vec<u8>) -> Vec<u8> {
    let hex = token.starts_with("0x") || token.starts_with("0X");
    if !hex && bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

fn record_error(msg: String) -> Box<Error> {
    tracing::debug!(target: "snmp_agent_core::user", error = %msg, "rejected user record");
    Error::UserRecord(msg.into()).boxed()
}

impl std::fmt::Debug for UsmUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsmUser")
            .field("engine_id", &hex::Bytes(&self.engine_id))
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("auth_protocol", &self.auth_protocol)
            .field("priv_protocol", &self.priv_protocol)
            .field("keys", &"[REDACTED]")
            .field("status", &self.status)
            .field("storage", &self.storage)
            .finish()
    }
}

/// Sorted, deduplicated user table.
#[derive(Debug)]
pub struct UserStore {
    users: Vec<UsmUser>,
    no_name: UsmUser,
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            users: Vec::new(),
            // Answers engine ID discovery probes, which carry no user name.
            no_name: UsmUser::new(Bytes::new(), Bytes::new()).with_storage(StorageType::Volatile),
        }
    }

    /// Insert `user` in index order, returning the entry it replaced.
    pub fn add(&mut self, user: UsmUser) -> Option<UsmUser> {
        let (engine_id, name) = (user.engine_id.clone(), user.name.clone());
        match self
            .users
            .binary_search_by(|u| u.cmp_key(&engine_id, &name))
        {
            Ok(i) => {
                tracing::debug!(
                    target: "snmp_agent_core::user",
                    { snmp.engine_id = %hex::Bytes(&engine_id), snmp.user = %String::from_utf8_lossy(&name) },
                    "replacing existing user"
                );
                Some(std::mem::replace(&mut self.users[i], user))
            }
            Err(i) => {
                self.users.insert(i, user);
                None
            }
        }
    }

    /// Exact lookup.
    pub fn get(&self, engine_id: &[u8], name: &[u8]) -> Option<&UsmUser> {
        self.users
            .binary_search_by(|u| u.cmp_key(engine_id, name))
            .ok()
            .map(|i| &self.users[i])
    }

    /// Lookup that falls back to the no-name discovery user when `name` is
    /// empty.
    pub fn get_or_default(&self, engine_id: &[u8], name: &[u8]) -> Option<&UsmUser> {
        self.get(engine_id, name)
            .or_else(|| name.is_empty().then_some(&self.no_name))
    }

    pub fn get_mut(&mut self, engine_id: &[u8], name: &[u8]) -> Option<&mut UsmUser> {
        let i = self
            .users
            .binary_search_by(|u| u.cmp_key(engine_id, name))
            .ok()?;
        Some(&mut self.users[i])
    }

    pub fn remove(&mut self, engine_id: &[u8], name: &[u8]) -> Option<UsmUser> {
        let i = self
            .users
            .binary_search_by(|u| u.cmp_key(engine_id, name))
            .ok()?;
        Some(self.users.remove(i))
    }

    /// The user discovery probes resolve to.
    pub fn no_name_user(&self) -> &UsmUser {
        &self.no_name
    }

    /// Users in index order.
    pub fn iter(&self) -> impl Iterator<Item = &UsmUser> {
        self.users.iter()
    }

    /// First user after `(engine_id, name)` in index order.
    pub fn next_after(&self, engine_id: &[u8], name: &[u8]) -> Option<&UsmUser> {
        let i = self
            .users
            .partition_point(|u| u.cmp_key(engine_id, name) != Ordering::Greater);
        self.users.get(i)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }

    /// Set a key of every matching user. Returns how many users changed.
    ///
    /// `engine_id` of `None` is the `*` wildcard: every user whose security
    /// name is `name`. Otherwise the single user `(engine_id, name)`.
    /// Passphrases and master keys are localized to each user's engine with
    /// that user's auth transform.
    ///
    /// Under the wildcard each user is rekeyed on its own; a user whose key
    /// cannot be derived is skipped. The call fails only if none changed.
    pub fn set_password(
        &mut self,
        name: &[u8],
        engine_id: Option<&[u8]>,
        kind: PasswordKind,
        value: &[u8],
    ) -> Result<usize> {
        let mut changed = 0;
        match engine_id {
            None => {
                let mut failure = None;
                for user in self.users.iter_mut().filter(|u| u.sec_name.as_ref() == name) {
                    match set_user_key(user, kind, value) {
                        Ok(()) => changed += 1,
                        Err(e) => {
                            tracing::debug!(
                                target: "snmp_agent_core::user",
                                {
                                    snmp.user = %String::from_utf8_lossy(&user.name),
                                    snmp.engine_id = %hex::Bytes(&user.engine_id),
                                    kind = kind.token(),
                                    error = %e
                                },
                                "skipped key update"
                            );
                            failure = Some(e);
                        }
                    }
                }
                if let (0, Some(e)) = (changed, failure) {
                    return Err(e);
                }
            }
            Some(engine_id) => {
                if let Some(user) = self.get_mut(engine_id, name) {
                    set_user_key(user, kind, value)?;
                    changed += 1;
                }
            }
        }
        tracing::debug!(
            target: "snmp_agent_core::user",
            { snmp.user = %String::from_utf8_lossy(name), kind = kind.token(), changed },
            "key updated"
        );
        Ok(changed)
    }

    /// Apply a directive line such as
    /// `userSetAuthPass <secName> <engineID|*> <value>`.
    ///
    /// Passphrases are taken literally (the rest of the line after the
    /// engine ID, quotes removed); keys are octet-string tokens.
    pub fn apply_password_directive(&mut self, line: &str) -> Result<usize> {
        let tokens = config::tokenize(line);
        let [token, name, engine, value @ ..] = tokens.as_slice() else {
            return Err(record_error(format!("incomplete directive '{line}'")));
        };
        let kind = PasswordKind::from_token(token)
            .ok_or_else(|| record_error(format!("unknown directive '{token}'")))?;
        if value.is_empty() {
            return Err(record_error(format!("{token}: missing value")));
        }

        let engine_id = match engine.as_str() {
            "*" => None,
            other => Some(
                config::read_octets(other).map_err(|e| record_error(format!("engineID: {e}")))?,
            ),
        };
        let value = match kind {
            PasswordKind::AuthPassphrase | PasswordKind::PrivPassphrase => {
                Zeroizing::new(value.join(" ").into_bytes())
            }
            _ => Zeroizing::new(
                config::read_octets(&value[0]).map_err(|e| record_error(format!("key: {e}")))?,
            ),
        };
        self.set_password(name.as_bytes(), engine_id.as_deref(), kind, &value)
    }

    /// Persisted records for every nonVolatile user.
    pub fn save_records(&self) -> Vec<String> {
        self.users
            .iter()
            .filter(|u| u.storage == StorageType::NonVolatile)
            .map(UsmUser::to_record)
            .collect()
    }

    /// Parse and add one persisted record.
    ///
    /// The user's engine gets an unauthenticated `(1, 0)` time record so
    /// that it counts as known and its traps are not answered with reports.
    pub fn load_record(&mut self, line: &str, times: &mut EngineTimeCache) -> Result<()> {
        let user = UsmUser::from_record(line)?;
        times.set(&user.engine_id, 1, 0, false);
        self.add(user);
        Ok(())
    }
}

fn set_user_key(user: &mut UsmUser, kind: PasswordKind, value: &[u8]) -> Result<()> {
    let key = match kind {
        PasswordKind::AuthPassphrase | PasswordKind::PrivPassphrase => {
            MasterKey::from_password(user.auth_protocol, value)?
                .localize(&user.engine_id)?
                .into_bytes()
        }
        PasswordKind::AuthMasterKey | PasswordKind::PrivMasterKey => {
            localize_key(user.auth_protocol, value, &user.engine_id)?.into_bytes()
        }
        PasswordKind::AuthLocalizedKey | PasswordKind::PrivLocalizedKey => {
            Zeroizing::new(value.to_vec())
        }
    };
    if kind.is_priv() {
        user.priv_key = clamp_priv_key(user.priv_protocol, &key);
    } else {
        user.auth_key = key;
    }
    Ok(())
}
