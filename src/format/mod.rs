//! Text formatting for key material and persisted records.
//!
//! - [`hex`]: hexadecimal encoding, decoding and lazy display for logging
//! - [`config`]: the token syntax persisted user records are written in
//!
//! ```
//! use snmp_agent_core::format::hex;
//!
//! assert_eq!(hex::encode(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
//! println!("{}", hex::Bytes(&[0x00, 0xff])); // prints: 00ff
//! ```

pub mod config;
pub mod hex;
