//! # snmp-agent-core
//!
//! The agent side of SNMP, minus the network: a MIB subtree registry that
//! maps OIDs to handlers, and the SNMPv3 User-based Security Model
//! (RFC 3414) that authenticates, decrypts and secures messages.
//!
//! ## Features
//!
//! - Per-context subtree registry with priorities, nested and range
//!   registrations, and a small lookup cache
//! - USM with HMAC-MD5/SHA authentication and DES/AES privacy
//! - Engine-time tracking and timeliness checks for local and remote engines
//! - User table with key localization, key change and line-oriented
//!   persistence
//! - usmStats counters and Report PDUs for rejected requests
//! - SNMPv1/v2c messages classified and passed through untouched
//!
//! ## Quick Start
//!
//! ```rust
//! use snmp_agent_core::agent::{AgentConfig, AgentSecurityState};
//! use snmp_agent_core::oid;
//! use snmp_agent_core::registry::RegistrationRequest;
//!
//! # fn main() -> snmp_agent_core::Result<()> {
//! let config = AgentConfig::builder(b"\x80\x00\x1f\x88\x80example".to_vec()).build()?;
//! let mut agent = AgentSecurityState::open(config)?;
//!
//! agent.register("", RegistrationRequest::new("system", oid!(1, 3, 6, 1, 2, 1, 1), 1u32));
//! agent.register(
//!     "",
//!     RegistrationRequest::new("sysDescr", oid!(1, 3, 6, 1, 2, 1, 1, 1), 2u32).priority(100),
//! );
//! assert_eq!(agent.resolve("", &oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)), Some(&2));
//! # Ok(())
//! # }
//! ```
//!
//! Datagrams go through [`AgentSecurityState::receive`](agent::AgentSecurityState::receive);
//! accepted SNMPv3 requests carry a [`SecurityStateRef`](v3::SecurityStateRef)
//! that [`respond`](agent::AgentSecurityState::respond) uses to secure the
//! answer with the same credentials.

pub mod agent;
pub mod ber;
pub mod error;
pub mod format;
pub mod message;
pub mod oid;
pub mod registry;
pub mod v3;

pub use error::{CryptoErrorKind, DecodeErrorKind, EncodeErrorKind, Error, Result, UsmError};
pub use message::{SecurityLevel, Version};
pub use oid::Oid;
pub use registry::{RegistrationRequest, Registry, RegistryStatus};
pub use v3::{AuthProtocol, PrivProtocol};
