//! SNMPv3 security benchmarks.
//!
//! Key derivation runs once per user and engine; HMAC and the USM
//! incoming/outgoing paths run for every secured message.

use std::hint::black_box;
use std::sync::Arc;

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use snmp_agent_core::ber::{EncodeBuf, tag};
use snmp_agent_core::message::{MsgFlags, MsgGlobalData, SecurityLevel, V3Message};
use snmp_agent_core::oid;
use snmp_agent_core::v3::{
    AuthProtocol, BuildStrategy, LocalEngine, LocalizedKey, ManualClock, OutgoingParams, PrivProtocol,
    TimeSyncPolicy, Usm, UsmUser,
};

const ENGINE_ID: &[u8] = b"\x80\x00\x1f\x88\x80\xe9\xb1\x04\x61\x73\x61\x00\x00\x00";
const PASSWORD: &[u8] = b"maplesyrup";

fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("v3_key_derivation");
    // 1 MB of hashing per derivation
    group.sample_size(10);

    for (name, protocol) in [("MD5", AuthProtocol::Md5), ("SHA-1", AuthProtocol::Sha1)] {
        group.bench_function(BenchmarkId::new("from_password", name), |b| {
            b.iter(|| black_box(LocalizedKey::from_password(protocol, PASSWORD, ENGINE_ID)))
        });
    }

    group.finish();
}

fn bench_hmac(c: &mut Criterion) {
    let mut group = c.benchmark_group("v3_hmac");

    for (name, protocol) in [("MD5", AuthProtocol::Md5), ("SHA-1", AuthProtocol::Sha1)] {
        let key = LocalizedKey::from_password(protocol, PASSWORD, ENGINE_ID).unwrap();
        for size in [128, 484, 1472] {
            let data = vec![0xABu8; size];
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(name, size), &data, |b, data| {
                b.iter(|| black_box(key.compute_hmac(data)))
            });
        }
    }

    group.finish();
}

fn scoped_pdu(varbinds: usize) -> Bytes {
    let mut buf = EncodeBuf::new();
    buf.push_sequence(|buf| {
        buf.push_constructed(tag::pdu::GET_REQUEST, |buf| {
            buf.push_sequence(|buf| {
                for i in 0..varbinds {
                    buf.push_sequence(|buf| {
                        buf.push_null();
                        buf.push_oid(&oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 10).child(i as u32));
                    });
                }
            });
            buf.push_integer(0);
            buf.push_integer(0);
            buf.push_integer(12345);
        });
        buf.push_octet_string(b"");
        buf.push_octet_string(ENGINE_ID);
    });
    buf.finish()
}

/// An agent-side and a manager-side USM sharing one user and clock.
fn pair(auth: AuthProtocol, privacy: PrivProtocol, strategy: BuildStrategy) -> (Usm, Usm) {
    let clock = Arc::new(ManualClock::new(1_000));
    let mut user = UsmUser::new(Bytes::from_static(ENGINE_ID), &b"bench"[..]);
    if !auth.is_none() {
        let priv_pass = (!privacy.is_none()).then_some(PASSWORD);
        user = user.with_passphrases(auth, PASSWORD, privacy, priv_pass).unwrap();
    }

    let mut agent = Usm::new(LocalEngine::new(Bytes::from_static(ENGINE_ID), 1, clock.clone()), TimeSyncPolicy::Strict)
        .unwrap()
        .with_build_strategy(strategy);
    agent.users_mut().add(user.clone());

    let mut manager = Usm::new(
        LocalEngine::new(Bytes::from_static(b"\x80\x00\x1f\x88\x80mgr"), 1, clock),
        TimeSyncPolicy::Strict,
    )
    .unwrap()
    .with_build_strategy(strategy);
    manager.users_mut().add(user);
    manager.times_mut().set(ENGINE_ID, 1, 0, true);

    (agent, manager)
}

const LEVELS: [(&str, SecurityLevel, AuthProtocol, PrivProtocol); 4] = [
    ("noAuthNoPriv", SecurityLevel::NoAuthNoPriv, AuthProtocol::None, PrivProtocol::None),
    ("authNoPriv-SHA", SecurityLevel::AuthNoPriv, AuthProtocol::Sha1, PrivProtocol::None),
    ("authPriv-SHA-DES", SecurityLevel::AuthPriv, AuthProtocol::Sha1, PrivProtocol::Des),
    ("authPriv-SHA-AES", SecurityLevel::AuthPriv, AuthProtocol::Sha1, PrivProtocol::Aes128),
];

fn bench_outgoing(c: &mut Criterion) {
    let mut group = c.benchmark_group("v3_outgoing");
    let scoped = scoped_pdu(10);

    for strategy in [BuildStrategy::Fixed, BuildStrategy::Reverse] {
        for (name, level, auth, privacy) in LEVELS {
            let (_, manager) = pair(auth, privacy, strategy);
            let global = MsgGlobalData::new(1, 65507, MsgFlags::new(level, true));
            let params = OutgoingParams {
                global_data: &global,
                engine_id: ENGINE_ID,
                user_name: b"bench",
                scoped_pdu: &scoped,
                state: None,
                max_size: 65507,
            };
            group.bench_function(BenchmarkId::new(format!("{strategy:?}"), name), |b| {
                b.iter(|| black_box(manager.generate_outgoing(&params)))
            });
        }
    }

    group.finish();
}

fn bench_incoming(c: &mut Criterion) {
    let mut group = c.benchmark_group("v3_incoming");
    let scoped = scoped_pdu(10);

    for (name, level, auth, privacy) in LEVELS {
        let (mut agent, manager) = pair(auth, privacy, BuildStrategy::Reverse);
        let global = MsgGlobalData::new(1, 65507, MsgFlags::new(level, true));
        let wire = manager
            .generate_outgoing(&OutgoingParams {
                global_data: &global,
                engine_id: ENGINE_ID,
                user_name: b"bench",
                scoped_pdu: &scoped,
                state: None,
                max_size: 65507,
            })
            .unwrap();
        let msg = V3Message::decode(Bytes::from(wire)).unwrap();

        group.bench_function(name, |b| b.iter(|| black_box(agent.process_incoming(&msg))));
    }

    group.finish();
}

criterion_group!(benches, bench_key_derivation, bench_hmac, bench_outgoing, bench_incoming);
criterion_main!(benches);
