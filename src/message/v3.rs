//! SNMPv3 message framing (RFC 3412 section 6).
//!
//! ```text
//! SEQUENCE {
//!     INTEGER version (3)
//!     SEQUENCE msgGlobalData {
//!         INTEGER msgID
//!         INTEGER msgMaxSize
//!         OCTET STRING msgFlags (1 byte)
//!         INTEGER msgSecurityModel
//!     }
//!     OCTET STRING msgSecurityParameters (opaque, USM-encoded)
//!     msgData (ScopedPDU or encrypted OCTET STRING)
//! }
//! ```
//!
//! The core never interprets msgData beyond its outer TLV. A decoded
//! [`V3Message`] keeps the whole raw message plus the absolute offsets of
//! the security parameters and msgData, which is what authentication and
//! decryption operate on.

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::{DecodeErrorKind, Error, Result};
use crate::v3::MIN_MSG_MAX_SIZE;

/// SNMPv3 security model identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SecurityModel {
    /// User-based Security Model (RFC 3414)
    Usm = 3,
}

impl SecurityModel {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Usm),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// SNMPv3 security level, ordered from least to most secure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SecurityLevel {
    /// No authentication, no privacy
    NoAuthNoPriv,
    /// Authentication only
    AuthNoPriv,
    /// Authentication and privacy (encryption)
    AuthPriv,
}

impl SecurityLevel {
    /// Decode from the msgFlags byte. Privacy without authentication is
    /// invalid.
    pub fn from_flags(flags: u8) -> Option<Self> {
        match (flags & 0x01 != 0, flags & 0x02 != 0) {
            (false, false) => Some(Self::NoAuthNoPriv),
            (true, false) => Some(Self::AuthNoPriv),
            (true, true) => Some(Self::AuthPriv),
            (false, true) => None,
        }
    }

    /// Encode to the msgFlags byte (without the reportable flag).
    pub fn to_flags(self) -> u8 {
        match self {
            Self::NoAuthNoPriv => 0x00,
            Self::AuthNoPriv => 0x01,
            Self::AuthPriv => 0x03,
        }
    }

    pub fn requires_auth(self) -> bool {
        matches!(self, Self::AuthNoPriv | Self::AuthPriv)
    }

    pub fn requires_priv(self) -> bool {
        matches!(self, Self::AuthPriv)
    }
}

/// Message flags (RFC 3412 section 6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgFlags {
    pub security_level: SecurityLevel,
    /// Whether a Report PDU may be sent back on error.
    pub reportable: bool,
}

impl MsgFlags {
    pub fn new(security_level: SecurityLevel, reportable: bool) -> Self {
        Self {
            security_level,
            reportable,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(Self {
            security_level: SecurityLevel::from_flags(byte)?,
            reportable: byte & 0x04 != 0,
        })
    }

    pub fn to_byte(self) -> u8 {
        let mut flags = self.security_level.to_flags();
        if self.reportable {
            flags |= 0x04;
        }
        flags
    }
}

/// msgGlobalData.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgGlobalData {
    pub msg_id: i32,
    pub msg_max_size: i32,
    pub msg_flags: MsgFlags,
    pub msg_security_model: SecurityModel,
}

impl MsgGlobalData {
    pub fn new(msg_id: i32, msg_max_size: i32, msg_flags: MsgFlags) -> Self {
        Self {
            msg_id,
            msg_max_size,
            msg_flags,
            msg_security_model: SecurityModel::Usm,
        }
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            buf.push_integer(self.msg_security_model.as_i32());
            buf.push_octet_string(&[self.msg_flags.to_byte()]);
            buf.push_integer(self.msg_max_size);
            buf.push_integer(self.msg_id);
        });
    }

    /// The version INTEGER followed by msgGlobalData, in wire order: the
    /// header bytes security processing places ahead of
    /// msgSecurityParameters.
    pub fn encode_header(&self) -> Vec<u8> {
        let mut buf = EncodeBuf::with_capacity(32);
        self.encode(&mut buf);
        buf.push_integer(3);
        buf.finish_vec()
    }

    /// Decode and validate msgGlobalData.
    ///
    /// - `msgID` must be in 0..2147483647
    /// - `msgMaxSize` must be in 484..2147483647
    /// - `msgFlags` must be one octet and not claim privacy without auth
    /// - `msgSecurityModel` must be USM
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;

        let at = seq.position();
        let msg_id = seq.read_integer()?;
        if msg_id < 0 {
            return Err(header_error(at, DecodeErrorKind::InvalidMsgId(msg_id)));
        }

        let at = seq.position();
        let msg_max_size = seq.read_integer()?;
        if msg_max_size < MIN_MSG_MAX_SIZE as i32 {
            return Err(header_error(
                at,
                DecodeErrorKind::MsgMaxSizeTooSmall {
                    value: msg_max_size,
                    minimum: MIN_MSG_MAX_SIZE as i32,
                },
            ));
        }

        let at = seq.position();
        let flags = seq.read_octet_string()?;
        let msg_flags = match flags.as_ref() {
            [byte] => MsgFlags::from_byte(*byte),
            _ => None,
        }
        .ok_or_else(|| header_error(at, DecodeErrorKind::InvalidMsgFlags))?;

        let at = seq.position();
        let raw_model = seq.read_integer()?;
        let msg_security_model = SecurityModel::from_i32(raw_model)
            .ok_or_else(|| header_error(at, DecodeErrorKind::UnknownSecurityModel(raw_model)))?;
        seq.finish()?;

        Ok(Self {
            msg_id,
            msg_max_size,
            msg_flags,
            msg_security_model,
        })
    }
}

fn header_error(offset: usize, kind: DecodeErrorKind) -> Box<Error> {
    tracing::debug!(target: "snmp_agent_core::ber", { snmp.offset = offset, kind = %kind }, "invalid v3 header");
    Error::decode(offset, kind)
}

/// A framed SNMPv3 message whose security parameters and msgData are still
/// opaque.
#[derive(Debug, Clone)]
pub struct V3Message {
    pub global_data: MsgGlobalData,
    /// Content of the msgSecurityParameters OCTET STRING.
    pub security_params: Bytes,
    /// Absolute offset of `security_params` within `raw`.
    pub security_params_offset: usize,
    /// The complete msgData TLV.
    pub data: Bytes,
    /// Absolute offset of `data` within `raw`.
    pub data_offset: usize,
    /// The whole message as received.
    pub raw: Bytes,
}

impl V3Message {
    /// Decode a complete v3 message.
    pub fn decode(raw: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(raw.clone());
        let mut seq = decoder.read_sequence()?;
        let at = seq.position();
        let version = seq.read_integer()?;
        if version != 3 {
            return Err(header_error(at, DecodeErrorKind::UnknownVersion(version)));
        }
        let message = Self::decode_from_sequence(&mut seq, raw)?;
        decoder.finish()?;
        Ok(message)
    }

    /// Decode the remainder of a message whose version has been read.
    pub(crate) fn decode_from_sequence(seq: &mut Decoder, raw: Bytes) -> Result<Self> {
        let global_data = MsgGlobalData::decode(seq)?;
        let (security_params, security_params_offset) = seq.read_octet_string_at()?;
        let data_offset = seq.position();
        let data = seq.read_raw_tlv()?;
        seq.finish()?;

        Ok(Self {
            global_data,
            security_params,
            security_params_offset,
            data,
            data_offset,
            raw,
        })
    }

    pub fn msg_id(&self) -> i32 {
        self.global_data.msg_id
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.global_data.msg_flags.security_level
    }

    pub fn is_reportable(&self) -> bool {
        self.global_data.msg_flags.reportable
    }

    /// Whether msgData is framed as ciphertext.
    pub fn is_encrypted_data(&self) -> bool {
        self.data.first() == Some(&tag::universal::OCTET_STRING)
    }
}
