//! BER tag constants.

/// Universal class tags.
pub mod universal {
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x30;
}

/// Application class tags (SMIv2).
pub mod application {
    pub const COUNTER32: u8 = 0x41;
}

/// PDU tags (context-specific, constructed).
pub mod pdu {
    pub const GET_REQUEST: u8 = 0xA0;
    pub const GET_NEXT_REQUEST: u8 = 0xA1;
    pub const RESPONSE: u8 = 0xA2;
    pub const SET_REQUEST: u8 = 0xA3;
    pub const TRAP_V1: u8 = 0xA4;
    pub const GET_BULK_REQUEST: u8 = 0xA5;
    pub const INFORM_REQUEST: u8 = 0xA6;
    pub const TRAP_V2: u8 = 0xA7;
    pub const REPORT: u8 = 0xA8;

    /// Confirmed-class PDUs (RFC 3411 section 2.8), which get a Report on
    /// security failure.
    pub fn is_confirmed(tag: u8) -> bool {
        matches!(
            tag,
            GET_REQUEST | GET_NEXT_REQUEST | SET_REQUEST | GET_BULK_REQUEST | INFORM_REQUEST
        )
    }
}
