//! Credentials cached between an incoming request and its response.

use bytes::Bytes;
use zeroize::Zeroizing;

use super::user::UsmUser;
use super::{AuthProtocol, PrivProtocol};
use crate::format::hex;
use crate::message::SecurityLevel;

/// The resolved user, engine and keys of one in-flight request.
///
/// Created by inbound processing once the user is known, and consumed by the
/// response so it is secured with the same credentials even if the user
/// table changes in between. Key bytes are zeroed when the reference drops,
/// on every path.
#[derive(Clone)]
pub struct SecurityStateRef {
    pub(crate) user_name: Bytes,
    pub(crate) engine_id: Bytes,
    pub(crate) auth_protocol: AuthProtocol,
    pub(crate) auth_key: Zeroizing<Vec<u8>>,
    pub(crate) priv_protocol: PrivProtocol,
    pub(crate) priv_key: Zeroizing<Vec<u8>>,
    pub(crate) level: SecurityLevel,
}

impl SecurityStateRef {
    pub(crate) fn from_user(user: &UsmUser, engine_id: Bytes, level: SecurityLevel) -> Self {
        Self {
            user_name: user.name().clone(),
            engine_id,
            auth_protocol: user.auth_protocol(),
            auth_key: Zeroizing::new(user.auth_key().to_vec()),
            priv_protocol: user.priv_protocol(),
            priv_key: Zeroizing::new(user.priv_key().to_vec()),
            level,
        }
    }

    pub fn user_name(&self) -> &Bytes {
        &self.user_name
    }

    pub fn engine_id(&self) -> &Bytes {
        &self.engine_id
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.level
    }

    pub fn auth_protocol(&self) -> AuthProtocol {
        self.auth_protocol
    }

    pub fn priv_protocol(&self) -> PrivProtocol {
        self.priv_protocol
    }
}

impl std::fmt::Debug for SecurityStateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityStateRef")
            .field("user_name", &String::from_utf8_lossy(&self.user_name))
            .field("engine_id", &hex::Bytes(&self.engine_id))
            .field("auth_protocol", &self.auth_protocol)
            .field("priv_protocol", &self.priv_protocol)
            .field("level", &self.level)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_credentials_from_user() {
        let user = UsmUser::new(&b"engine"[..], &b"bob"[..])
            .with_auth(AuthProtocol::Md5, &[1; 16])
            .with_priv(PrivProtocol::Des, &[2; 16]);
        let state = SecurityStateRef::from_user(&user, user.engine_id().clone(), SecurityLevel::AuthPriv);
        assert_eq!(state.user_name().as_ref(), b"bob");
        assert_eq!(&state.auth_key[..], &[1; 16]);
        assert_eq!(&state.priv_key[..], &[2; 16]);
        assert_eq!(state.security_level(), SecurityLevel::AuthPriv);

        let shown = format!("{state:?}");
        assert!(shown.contains("REDACTED"));
        assert!(shown.contains("656e67696e65"));
    }
}
