//! Community-based message framing (v1/v2c).
//!
//! `SEQUENCE { version INTEGER, community OCTET STRING, pdu PDU }`
//!
//! These bypass USM entirely. The core only splits off the community and
//! hands the PDU TLV through untouched.

use bytes::Bytes;

use super::Version;
use crate::ber::{Decoder, EncodeBuf};
use crate::error::Result;

/// A v1 or v2c message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityMessage {
    pub version: Version,
    pub community: Bytes,
    /// The PDU TLV, not interpreted.
    pub pdu: Bytes,
}

impl CommunityMessage {
    pub fn new(version: Version, community: impl Into<Bytes>, pdu: impl Into<Bytes>) -> Self {
        Self {
            version,
            community: community.into(),
            pdu: pdu.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = EncodeBuf::with_capacity(self.pdu.len() + self.community.len() + 16);
        buf.push_sequence(|buf| {
            buf.push_bytes(&self.pdu);
            buf.push_octet_string(&self.community);
            buf.push_integer(self.version.as_i32());
        });
        buf.finish()
    }

    /// Decode the remainder of a message whose version has been read.
    pub(crate) fn decode_from_sequence(seq: &mut Decoder, version: Version) -> Result<Self> {
        let community = seq.read_octet_string()?;
        let pdu = seq.read_raw_tlv()?;
        seq.finish()?;
        Ok(Self {
            version,
            community,
            pdu,
        })
    }
}
