//! Outgoing message assembly.
//!
//! Two backends share the [`MessageBuilder`] trait:
//!
//! - [`FixedBuilder`] computes every length up front and writes the message
//!   front-to-back into a buffer of exactly the final size, failing before
//!   any write if that size exceeds its capacity.
//! - [`ReverseBuilder`] prepends into a growable [`EncodeBuf`], learning
//!   each length as the content under it is finished.
//!
//! Both emit minimal BER lengths, so identical [`MessageParts`] give
//! identical bytes and the same authentication-parameter offset.

use crate::ber::{EncodeBuf, tag, tlv_len, unsigned_content_len, write_length};
use crate::error::{EncodeErrorKind, Error, Result, UsmError};

/// msgData as it goes on the wire.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// A complete plaintext ScopedPDU TLV, copied as is.
    Plain(&'a [u8]),
    /// Ciphertext, wrapped in an OCTET STRING.
    Encrypted(&'a [u8]),
}

impl Payload<'_> {
    fn wire_len(&self) -> usize {
        match self {
            Self::Plain(tlv) => tlv.len(),
            Self::Encrypted(data) => tlv_len(data.len()),
        }
    }
}

/// Everything that goes into one USM-secured message.
#[derive(Debug, Clone, Copy)]
pub struct MessageParts<'a> {
    /// Version INTEGER followed by the msgGlobalData SEQUENCE.
    pub header: &'a [u8],
    pub engine_id: &'a [u8],
    pub boots: u32,
    pub time: u32,
    pub user_name: &'a [u8],
    /// Length of the zero-filled msgAuthenticationParameters placeholder.
    pub auth_len: usize,
    pub priv_params: &'a [u8],
    pub payload: Payload<'a>,
}

/// An assembled message whose authentication field is still zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltMessage {
    pub bytes: Vec<u8>,
    /// Absolute offset of the msgAuthenticationParameters content.
    pub auth_offset: usize,
}

/// Assembles the wire form of a message.
pub trait MessageBuilder {
    fn build(&self, parts: &MessageParts<'_>) -> Result<BuiltMessage>;
}

/// Which backend outgoing processing uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BuildStrategy {
    /// Pre-sized, front-to-back.
    Fixed,
    /// Growable, back-to-front.
    #[default]
    Reverse,
}

impl BuildStrategy {
    /// Build with this strategy, refusing output longer than `limit`.
    pub fn build(self, parts: &MessageParts<'_>, limit: usize) -> Result<BuiltMessage> {
        match self {
            Self::Fixed => FixedBuilder::new(limit).build(parts),
            Self::Reverse => ReverseBuilder::with_limit(limit).build(parts),
        }
    }
}

fn too_long(needed: usize, capacity: usize) -> Box<Error> {
    let kind = EncodeErrorKind::BufferTooSmall { needed, capacity };
    tracing::debug!(target: "snmp_agent_core::usm", { kind = %kind }, "outgoing message too long");
    Error::usm(UsmError::TooLong)
}

/// Pre-sized backend.
#[derive(Debug, Clone, Copy)]
pub struct FixedBuilder {
    capacity: usize,
}

/// Content lengths of the nested envelope, outermost last.
struct Layout {
    usm_content: usize,
    usm_seq: usize,
    message_content: usize,
    total: usize,
}

impl Layout {
    fn of(parts: &MessageParts<'_>) -> Self {
        let usm_content = tlv_len(parts.engine_id.len())
            + tlv_len(unsigned_content_len(parts.boots))
            + tlv_len(unsigned_content_len(parts.time))
            + tlv_len(parts.user_name.len())
            + tlv_len(parts.auth_len)
            + tlv_len(parts.priv_params.len());
        let usm_seq = tlv_len(usm_content);
        let message_content = parts.header.len() + tlv_len(usm_seq) + parts.payload.wire_len();
        Self {
            usm_content,
            usm_seq,
            message_content,
            total: tlv_len(message_content),
        }
    }
}

impl FixedBuilder {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn put_header(out: &mut Vec<u8>, tag: u8, len: usize) -> Result<()> {
    out.push(tag);
    write_length(out, len)
}

fn put_octets(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    put_header(out, tag::universal::OCTET_STRING, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn put_unsigned(out: &mut Vec<u8>, value: u32) -> Result<()> {
    let n = unsigned_content_len(value);
    put_header(out, tag::universal::INTEGER, n)?;
    let bytes = value.to_be_bytes();
    if n == 5 {
        out.push(0);
        out.extend_from_slice(&bytes);
    } else {
        out.extend_from_slice(&bytes[4 - n..]);
    }
    Ok(())
}

impl MessageBuilder for FixedBuilder {
    fn build(&self, parts: &MessageParts<'_>) -> Result<BuiltMessage> {
        let layout = Layout::of(parts);
        if layout.total > self.capacity {
            return Err(too_long(layout.total, self.capacity));
        }

        let mut out = Vec::with_capacity(layout.total);
        put_header(&mut out, tag::universal::SEQUENCE, layout.message_content)?;
        out.extend_from_slice(parts.header);
        put_header(&mut out, tag::universal::OCTET_STRING, layout.usm_seq)?;
        put_header(&mut out, tag::universal::SEQUENCE, layout.usm_content)?;
        put_octets(&mut out, parts.engine_id)?;
        put_unsigned(&mut out, parts.boots)?;
        put_unsigned(&mut out, parts.time)?;
        put_octets(&mut out, parts.user_name)?;
        put_header(&mut out, tag::universal::OCTET_STRING, parts.auth_len)?;
        let auth_offset = out.len();
        out.resize(auth_offset + parts.auth_len, 0);
        put_octets(&mut out, parts.priv_params)?;
        match parts.payload {
            Payload::Plain(tlv) => out.extend_from_slice(tlv),
            Payload::Encrypted(data) => put_octets(&mut out, data)?,
        }

        if out.len() != layout.total {
            tracing::warn!(target: "snmp_agent_core::usm", { expected = layout.total, actual = out.len() }, "fixed layout mismatch");
            return Err(Error::usm(UsmError::Generic));
        }
        Ok(BuiltMessage {
            bytes: out,
            auth_offset,
        })
    }
}

/// Growable backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseBuilder {
    limit: Option<usize>,
}

impl ReverseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject finished messages longer than `limit`.
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

impl MessageBuilder for ReverseBuilder {
    fn build(&self, parts: &MessageParts<'_>) -> Result<BuiltMessage> {
        // Rough guess; the buffer grows if the envelope is larger.
        let hint = parts.header.len()
            + parts.payload.wire_len()
            + parts.engine_id.len()
            + parts.user_name.len()
            + parts.auth_len
            + parts.priv_params.len()
            + 32;
        let mut buf = EncodeBuf::with_capacity(hint);
        let mut auth_mark = 0;

        buf.push_sequence(|buf| {
            match parts.payload {
                Payload::Plain(tlv) => buf.push_bytes(tlv),
                Payload::Encrypted(data) => buf.push_octet_string(data),
            }
            buf.push_constructed(tag::universal::OCTET_STRING, |buf| {
                buf.push_sequence(|buf| {
                    buf.push_octet_string(parts.priv_params);
                    buf.push_bytes(&vec![0; parts.auth_len]);
                    auth_mark = buf.len();
                    buf.push_header(tag::universal::OCTET_STRING, parts.auth_len);
                    buf.push_octet_string(parts.user_name);
                    buf.push_unsigned32(tag::universal::INTEGER, parts.time);
                    buf.push_unsigned32(tag::universal::INTEGER, parts.boots);
                    buf.push_octet_string(parts.engine_id);
                });
            });
            buf.push_bytes(parts.header);
        });

        let bytes = buf.finish_vec();
        if let Some(limit) = self.limit
            && bytes.len() > limit
        {
            return Err(too_long(bytes.len(), limit));
        }
        let auth_offset = bytes.len() - auth_mark;
        Ok(BuiltMessage { bytes, auth_offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::Decoder;
    use crate::message::{MsgFlags, MsgGlobalData, SecurityLevel, V3Message};
    use crate::v3::usm::UsmSecurityParams;

    fn header() -> Vec<u8> {
        MsgGlobalData::new(77, 1500, MsgFlags::new(SecurityLevel::AuthPriv, true)).encode_header()
    }

    fn both(parts: &MessageParts<'_>) -> BuiltMessage {
        let fixed = FixedBuilder::new(65507).build(parts).unwrap();
        let reverse = ReverseBuilder::new().build(parts).unwrap();
        assert_eq!(fixed, reverse);
        fixed
    }

    #[test]
    fn backends_agree_on_bytes_and_offset() {
        let header = header();
        let scoped = [0x30, 0x05, 0x04, 0x00, 0x04, 0x01, 0x61];
        let long_name = [b'u'; 200];
        let cases = [
            (b"engine".as_slice(), 0u32, 0u32, b"".as_slice(), 0usize, b"".as_slice()),
            (
                b"\x80\x00\x1f\x88\x80\x01\x02\x03".as_slice(),
                1,
                127,
                b"alice".as_slice(),
                12,
                b"".as_slice(),
            ),
            (b"eng".as_slice(), u32::MAX >> 1, 0x80, b"bob".as_slice(), 24, b"saltsalt".as_slice()),
            (b"eng".as_slice(), 0x8000_0000, 0xFFFF_FFFF, long_name.as_slice(), 48, b"12345678".as_slice()),
        ];

        for (engine_id, boots, time, user_name, auth_len, priv_params) in cases {
            for payload in [Payload::Plain(&scoped), Payload::Encrypted(&[0xAB; 300])] {
                let parts = MessageParts {
                    header: &header,
                    engine_id,
                    boots,
                    time,
                    user_name,
                    auth_len,
                    priv_params,
                    payload,
                };
                let built = both(&parts);
                assert!(built.bytes[built.auth_offset..built.auth_offset + auth_len]
                    .iter()
                    .all(|&b| b == 0));

                let msg = V3Message::decode(built.bytes.clone().into()).unwrap();
                let params = UsmSecurityParams::decode_at(
                    msg.security_params.clone(),
                    msg.security_params_offset,
                )
                .unwrap();
                assert_eq!(params.auth_params_offset, built.auth_offset);
                assert_eq!(params.engine_id.as_ref(), engine_id);
                assert_eq!(params.engine_boots, boots);
                assert_eq!(params.engine_time, time);
                assert_eq!(params.user_name.as_ref(), user_name);
                assert_eq!(params.priv_params.as_ref(), priv_params);
            }
        }
    }

    #[test]
    fn plain_payload_is_copied_verbatim() {
        let header = header();
        let scoped = [0x30, 0x03, 0x04, 0x01, 0x7a];
        let built = both(&MessageParts {
            header: &header,
            engine_id: b"e",
            boots: 1,
            time: 2,
            user_name: b"u",
            auth_len: 0,
            priv_params: b"",
            payload: Payload::Plain(&scoped),
        });
        assert!(built.bytes.ends_with(&scoped));

        let mut outer = Decoder::from_slice(&built.bytes);
        let mut seq = outer.read_sequence().unwrap();
        assert_eq!(seq.read_integer().unwrap(), 3);
    }

    #[test]
    fn capacity_is_enforced() {
        let header = header();
        let data = [0u8; 600];
        let parts = MessageParts {
            header: &header,
            engine_id: b"engine",
            boots: 1,
            time: 1,
            user_name: b"user",
            auth_len: 12,
            priv_params: b"12345678",
            payload: Payload::Encrypted(&data),
        };
        let exact = ReverseBuilder::new().build(&parts).unwrap().bytes.len();

        assert!(FixedBuilder::new(exact).build(&parts).is_ok());
        for strategy in [BuildStrategy::Fixed, BuildStrategy::Reverse] {
            let err = strategy.build(&parts, exact - 1).unwrap_err();
            assert_eq!(err.usm_reason(), Some(UsmError::TooLong));
            assert!(strategy.build(&parts, exact).is_ok());
        }
    }
}
