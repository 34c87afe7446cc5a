//! Message framing and version dispatch.
//!
//! - [`CommunityMessage`]: v1/v2c, which bypass security processing
//! - [`V3Message`]: v3, handed to USM with its offsets intact

mod community;
mod v3;

pub use community::CommunityMessage;
pub use v3::{MsgFlags, MsgGlobalData, SecurityLevel, SecurityModel, V3Message};

use bytes::Bytes;

use crate::ber::Decoder;
use crate::error::{DecodeErrorKind, Error, Result};

/// Protocol version carried in the first INTEGER of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    V1,
    V2c,
    V3,
}

impl Version {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::V1),
            1 => Some(Self::V2c),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::V1 => 0,
            Self::V2c => 1,
            Self::V3 => 3,
        }
    }
}

/// A decoded message of any version.
#[derive(Debug, Clone)]
pub enum Message {
    Community(CommunityMessage),
    V3(V3Message),
}

impl Message {
    pub fn version(&self) -> Version {
        match self {
            Self::Community(m) => m.version,
            Self::V3(_) => Version::V3,
        }
    }

    /// Classify and frame a raw message by its version field.
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data.clone());
        let mut seq = decoder.read_sequence()?;

        let at = seq.position();
        let raw_version = seq.read_integer()?;
        let version = Version::from_i32(raw_version).ok_or_else(|| {
            tracing::debug!(target: "snmp_agent_core::ber", { snmp.offset = at, version = raw_version }, "unknown message version");
            Error::decode(at, DecodeErrorKind::UnknownVersion(raw_version))
        })?;

        let message = match version {
            Version::V1 | Version::V2c => {
                Self::Community(CommunityMessage::decode_from_sequence(&mut seq, version)?)
            }
            Version::V3 => Self::V3(V3Message::decode_from_sequence(&mut seq, data)?),
        };
        decoder.finish()?;
        Ok(message)
    }
}

impl From<CommunityMessage> for Message {
    fn from(msg: CommunityMessage) -> Self {
        Self::Community(msg)
    }
}

impl From<V3Message> for Message {
    fn from(msg: V3Message) -> Self {
        Self::V3(msg)
    }
}
