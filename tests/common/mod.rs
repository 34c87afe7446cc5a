//! Shared test infrastructure: a manager-side USM that talks to an
//! in-process agent, plus ScopedPDU helpers.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use snmp_agent_core::agent::{AgentConfig, AgentSecurityState};
use snmp_agent_core::ber::{Decoder, EncodeBuf, tag};
use snmp_agent_core::message::{MsgFlags, MsgGlobalData, SecurityLevel, V3Message};
use snmp_agent_core::v3::{
    AuthProtocol, BuildStrategy, LocalEngine, ManualClock, OutgoingParams, PrivProtocol, ProcessedIncoming,
    TimeSyncPolicy, Usm, UsmSecurityParams, UsmUser,
};
use snmp_agent_core::{Oid, Result, oid};

pub const AGENT_ENGINE_ID: &[u8] = b"\x80\x00\x1f\x88\x80agent-under-test";
pub const MANAGER_ENGINE_ID: &[u8] = b"\x80\x00\x1f\x88\x80manager";
pub const AUTH_PASS: &[u8] = b"authpassword123";
pub const PRIV_PASS: &[u8] = b"privpassword123";

/// sysDescr.0
pub fn sys_descr() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)
}

/// Agent at boots 3 on a manual clock.
pub fn agent_with_clock(strategy: BuildStrategy) -> (Arc<ManualClock>, AgentSecurityState<u32>) {
    init_tracing();
    let clock = Arc::new(ManualClock::new(10_000));
    let config = AgentConfig::builder(AGENT_ENGINE_ID.to_vec())
        .engine_boots(3)
        .build_strategy(strategy)
        .build()
        .unwrap();
    let agent = AgentSecurityState::open_with_clock(config, clock.clone()).unwrap();
    (clock, agent)
}

/// Route crate logs to the test output. `RUST_LOG=snmp_agent_core=debug`
/// shows the USM decisions behind a failing case.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// GetRequest ScopedPDU for `oid` in the default context.
pub fn get_scoped_pdu(context_engine_id: &[u8], request_id: i32, oid: &Oid) -> Bytes {
    scoped_pdu(tag::pdu::GET_REQUEST, context_engine_id, request_id, |buf| {
        buf.push_sequence(|buf| {
            buf.push_null();
            buf.push_oid(oid);
        });
    })
}

/// Response ScopedPDU carrying one OCTET STRING.
pub fn response_scoped_pdu(context_engine_id: &[u8], request_id: i32, oid: &Oid, value: &[u8]) -> Bytes {
    scoped_pdu(tag::pdu::RESPONSE, context_engine_id, request_id, |buf| {
        buf.push_sequence(|buf| {
            buf.push_octet_string(value);
            buf.push_oid(oid);
        });
    })
}

fn scoped_pdu(pdu_tag: u8, context_engine_id: &[u8], request_id: i32, varbinds: impl FnOnce(&mut EncodeBuf)) -> Bytes {
    let mut buf = EncodeBuf::new();
    buf.push_sequence(|buf| {
        buf.push_constructed(pdu_tag, |buf| {
            buf.push_sequence(varbinds);
            buf.push_integer(0);
            buf.push_integer(0);
            buf.push_integer(request_id);
        });
        buf.push_octet_string(b"");
        buf.push_octet_string(context_engine_id);
    });
    buf.finish()
}

/// What a Report carries, read back without any security processing.
#[derive(Debug)]
pub struct ReportContents {
    pub engine_id: Bytes,
    pub boots: u32,
    pub time: u32,
    pub level: SecurityLevel,
    pub request_id: i32,
    pub counter: Option<(Oid, u32)>,
}

/// Decode a plaintext Report message.
pub fn read_report(data: &[u8]) -> ReportContents {
    let msg = V3Message::decode(Bytes::copy_from_slice(data)).unwrap();
    let params = UsmSecurityParams::decode(msg.security_params.clone()).unwrap();

    let mut outer = Decoder::new(msg.data.clone());
    let mut scoped = outer.read_sequence().unwrap();
    scoped.read_octet_string().unwrap();
    scoped.read_octet_string().unwrap();
    let mut pdu = scoped.read_constructed(tag::pdu::REPORT).unwrap();
    let request_id = pdu.read_integer().unwrap();
    pdu.read_integer().unwrap();
    pdu.read_integer().unwrap();
    let mut varbinds = pdu.read_sequence().unwrap();
    let counter = if varbinds.is_empty() {
        None
    } else {
        let mut vb = varbinds.read_sequence().unwrap();
        let oid = vb.read_oid().unwrap();
        let len = vb.expect_tag(tag::application::COUNTER32).unwrap();
        let value = vb
            .read_bytes(len)
            .unwrap()
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        Some((oid, value))
    };

    ReportContents {
        engine_id: params.engine_id,
        boots: params.engine_boots,
        time: params.engine_time,
        level: msg.security_level(),
        request_id,
        counter,
    }
}

/// The manager end of a conversation with one agent.
pub struct Manager {
    pub usm: Usm,
    pub agent_engine_id: Bytes,
    /// msgMaxSize advertised in requests.
    pub max_size: i32,
    next_msg_id: i32,
}

impl Manager {
    pub fn new(clock: Arc<ManualClock>, agent_engine_id: &[u8]) -> Self {
        let local = LocalEngine::new(Bytes::from_static(MANAGER_ENGINE_ID), 1, clock);
        Self {
            usm: Usm::new(local, TimeSyncPolicy::Strict).unwrap(),
            agent_engine_id: Bytes::copy_from_slice(agent_engine_id),
            max_size: 65507,
            next_msg_id: 100,
        }
    }

    /// Add a user keyed to the agent's engine.
    pub fn add_user(&mut self, name: &[u8], auth: AuthProtocol, privacy: PrivProtocol) {
        let user = UsmUser::new(self.agent_engine_id.clone(), Bytes::copy_from_slice(name));
        let user = if auth.is_none() {
            user
        } else {
            let priv_pass = (!privacy.is_none()).then_some(PRIV_PASS);
            user.with_passphrases(auth, AUTH_PASS, privacy, priv_pass).unwrap()
        };
        self.usm.users_mut().add(user);
    }

    /// Learn the agent's current boots and time as if from an
    /// authenticated exchange.
    pub fn synchronize(&mut self, agent: &AgentSecurityState<u32>) {
        let (boots, time) = agent.usm().local_engine().boots_and_time();
        let id = self.agent_engine_id.clone();
        self.usm.times_mut().set(&id, boots, time, true);
    }

    /// Secure `scoped_pdu` for the agent.
    pub fn secure(&mut self, user: &[u8], level: SecurityLevel, scoped_pdu: &[u8]) -> Result<Vec<u8>> {
        let engine_id = self.agent_engine_id.clone();
        self.secure_for(&engine_id, user, level, scoped_pdu)
    }

    fn secure_for(&mut self, engine_id: &[u8], user: &[u8], level: SecurityLevel, scoped_pdu: &[u8]) -> Result<Vec<u8>> {
        self.next_msg_id += 1;
        let global = MsgGlobalData::new(self.next_msg_id, self.max_size, MsgFlags::new(level, true));
        self.usm.generate_outgoing(&OutgoingParams {
            global_data: &global,
            engine_id,
            user_name: user,
            scoped_pdu,
            state: None,
            max_size: 65507,
        })
    }

    /// The RFC 3414 section 4 discovery probe: no engine ID, no user,
    /// noAuthNoPriv, reportable.
    pub fn discovery_probe(&mut self, request_id: i32) -> Vec<u8> {
        let scoped = get_scoped_pdu(b"", request_id, &sys_descr());
        self.secure_for(b"", b"", SecurityLevel::NoAuthNoPriv, &scoped).unwrap()
    }

    /// A GetRequest for sysDescr.0.
    pub fn get(&mut self, user: &[u8], level: SecurityLevel, request_id: i32) -> Vec<u8> {
        let scoped = get_scoped_pdu(&self.agent_engine_id.clone(), request_id, &sys_descr());
        self.secure(user, level, &scoped).unwrap()
    }

    /// Run the agent's response through manager-side processing.
    pub fn accept(&mut self, data: Vec<u8>) -> Result<ProcessedIncoming> {
        let msg = V3Message::decode(Bytes::from(data))?;
        self.usm.process_incoming(&msg)
    }
}
