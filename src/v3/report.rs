//! usmStats counters and Report PDUs (RFC 3414 section 3.2, RFC 3412
//! section 7.1.3).

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::UsmError;
use crate::oid::Oid;

/// Security-processing counters.
///
/// All are Counter32 and wrap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsmStats {
    pub unsupported_sec_levels: u32,
    pub not_in_time_windows: u32,
    pub unknown_user_names: u32,
    pub unknown_engine_ids: u32,
    pub wrong_digests: u32,
    pub decryption_errors: u32,
    /// snmpInASNParseErrs, bumped for unparseable security parameters.
    pub in_asn_parse_errs: u32,
}

impl UsmStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, reason: UsmError) -> Option<&mut u32> {
        match reason {
            UsmError::UnsupportedSecurityLevel => Some(&mut self.unsupported_sec_levels),
            UsmError::NotInTimeWindow => Some(&mut self.not_in_time_windows),
            UsmError::UnknownSecurityName => Some(&mut self.unknown_user_names),
            UsmError::UnknownEngineId => Some(&mut self.unknown_engine_ids),
            UsmError::AuthenticationFailure => Some(&mut self.wrong_digests),
            UsmError::DecryptionError => Some(&mut self.decryption_errors),
            UsmError::ParseError => Some(&mut self.in_asn_parse_errs),
            _ => None,
        }
    }

    /// Count one failure, returning the new counter value if `reason` has
    /// a counter.
    pub fn increment(&mut self, reason: UsmError) -> Option<u32> {
        let slot = self.slot(reason)?;
        *slot = slot.wrapping_add(1);
        Some(*slot)
    }

    /// Current counter value for `reason`.
    pub fn get(&self, reason: UsmError) -> Option<u32> {
        Some(match reason {
            UsmError::UnsupportedSecurityLevel => self.unsupported_sec_levels,
            UsmError::NotInTimeWindow => self.not_in_time_windows,
            UsmError::UnknownSecurityName => self.unknown_user_names,
            UsmError::UnknownEngineId => self.unknown_engine_ids,
            UsmError::AuthenticationFailure => self.wrong_digests,
            UsmError::DecryptionError => self.decryption_errors,
            UsmError::ParseError => self.in_asn_parse_errs,
            _ => return None,
        })
    }

    /// The counter OID and value a Report carries for `reason`.
    pub fn report_varbind(&self, reason: UsmError) -> Option<(Oid, u32)> {
        Some((reason.stats_oid()?, self.get(reason)?))
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Tag and request-id of a plaintext ScopedPDU, if it can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduSummary {
    pub tag: u8,
    pub request_id: i32,
}

impl PduSummary {
    /// Read just enough of a ScopedPDU to decide on a Report.
    pub fn peek(scoped_pdu: &[u8]) -> Option<Self> {
        let mut decoder = Decoder::from_slice(scoped_pdu);
        let mut scoped = decoder.read_sequence().ok()?;
        scoped.read_octet_string().ok()?;
        scoped.read_octet_string().ok()?;
        let tag = scoped.peek_tag()?;
        let mut pdu = scoped.read_constructed(tag).ok()?;
        let request_id = pdu.read_integer().ok()?;
        Some(Self { tag, request_id })
    }

    pub fn is_confirmed(&self) -> bool {
        tag::pdu::is_confirmed(self.tag)
    }
}

/// Whether a failed request earns a Report.
///
/// Confirmed PDUs always do. If the PDU could not be read at all (it was
/// encrypted), the reportable flag decides.
pub fn should_report(reason: UsmError, pdu: Option<&PduSummary>, reportable: bool) -> bool {
    if reason.stats_oid().is_none() {
        return false;
    }
    match pdu {
        Some(pdu) => pdu.is_confirmed(),
        None => reportable,
    }
}

/// Encode a Report ScopedPDU.
///
/// contextEngineID is the local engine and contextName is empty. With no
/// counter the varbind list is empty, which is the reply to a successful
/// discovery probe.
pub fn report_scoped_pdu(
    context_engine_id: &[u8],
    request_id: i32,
    counter: Option<&(Oid, u32)>,
) -> Bytes {
    let mut buf = EncodeBuf::with_capacity(64 + context_engine_id.len());
    buf.push_sequence(|buf| {
        buf.push_constructed(tag::pdu::REPORT, |buf| {
            buf.push_sequence(|buf| {
                if let Some((oid, value)) = counter {
                    buf.push_sequence(|buf| {
                        buf.push_unsigned32(tag::application::COUNTER32, *value);
                        buf.push_oid(oid);
                    });
                }
            });
            buf.push_integer(0);
            buf.push_integer(0);
            buf.push_integer(request_id);
        });
        buf.push_octet_string(b"");
        buf.push_octet_string(context_engine_id);
    });
    buf.finish()
}
