//! User table persistence across agent restarts.

mod common;

use bytes::Bytes;
use common::{AGENT_ENGINE_ID, AUTH_PASS, Manager, PRIV_PASS, agent_with_clock};
use snmp_agent_core::agent::{AgentConfig, AgentSecurityState, Inbound};
use snmp_agent_core::format::config::tokenize;
use snmp_agent_core::v3::{AuthProtocol, BuildStrategy, RowStatus, StorageType, UsmUser};
use snmp_agent_core::{Error, PrivProtocol, SecurityLevel};

fn reopen(records: &[String]) -> AgentSecurityState<u32> {
    let config = AgentConfig::builder(AGENT_ENGINE_ID.to_vec())
        .engine_boots(4)
        .build()
        .unwrap();
    let mut agent = AgentSecurityState::open(config).unwrap();
    let loaded = agent
        .load_user_records(records.iter().map(String::as_str))
        .unwrap();
    assert_eq!(loaded, records.len());
    agent
}

#[test]
fn keys_survive_restart() {
    let (_, mut agent) = agent_with_clock(BuildStrategy::Reverse);
    agent
        .create_user_with_passphrases(b"alice", AuthProtocol::Sha1, AUTH_PASS, PrivProtocol::Aes128, Some(PRIV_PASS))
        .unwrap();
    agent
        .create_user_with_passphrases(b"bob", AuthProtocol::Md5, AUTH_PASS, PrivProtocol::None, None)
        .unwrap();
    agent.create_user(None, b"guest");

    let before: Vec<_> = agent
        .usm()
        .users()
        .iter()
        .map(|u| (u.name().clone(), u.auth_key().to_vec(), u.priv_key().to_vec()))
        .collect();

    let records = agent.close();
    assert_eq!(records.len(), 3);
    for record in &records {
        let tokens = tokenize(record);
        assert_eq!(tokens[0], "usmUser");
        assert_eq!(tokens.len(), 12, "{record}");
    }

    let restored = reopen(&records);
    let after: Vec<_> = restored
        .usm()
        .users()
        .iter()
        .map(|u| (u.name().clone(), u.auth_key().to_vec(), u.priv_key().to_vec()))
        .collect();
    assert_eq!(before, after);

    let alice = restored.usm().users().get(AGENT_ENGINE_ID, b"alice").unwrap();
    assert_eq!(alice.auth_protocol(), AuthProtocol::Sha1);
    assert_eq!(alice.priv_protocol(), PrivProtocol::Aes128);
    assert_eq!(alice.status(), RowStatus::Active);
    assert_eq!(alice.storage(), StorageType::NonVolatile);
}

/// A restored agent authenticates requests keyed before the restart.
#[test]
fn restored_user_authenticates() {
    let (clock, mut agent) = agent_with_clock(BuildStrategy::Fixed);
    agent
        .create_user_with_passphrases(b"alice", AuthProtocol::Md5, AUTH_PASS, PrivProtocol::Des, Some(PRIV_PASS))
        .unwrap();
    let records = agent.close();

    let config = AgentConfig::builder(AGENT_ENGINE_ID.to_vec())
        .engine_boots(4)
        .build()
        .unwrap();
    let mut agent = AgentSecurityState::<u32>::open_with_clock(config, clock.clone()).unwrap();
    agent
        .load_user_records(records.iter().map(String::as_str))
        .unwrap();

    let mut manager = Manager::new(clock, AGENT_ENGINE_ID);
    manager.add_user(b"alice", AuthProtocol::Md5, PrivProtocol::Des);
    manager.synchronize(&agent);

    let request = manager.get(b"alice", SecurityLevel::AuthPriv, 77);
    match agent.receive(Bytes::from(request)).unwrap() {
        Inbound::Secured(accepted) => assert_eq!(accepted.user_name.as_ref(), b"alice"),
        other => panic!("expected acceptance, got {other:?}"),
    }
}

/// Only nonVolatile rows are written out.
#[test]
fn volatile_and_readonly_rows_are_skipped() {
    let (_, mut agent) = agent_with_clock(BuildStrategy::Reverse);
    agent.create_user(None, b"kept");
    agent.create_initial_user(b"initial", None, None);
    agent
        .usm_mut()
        .users_mut()
        .add(UsmUser::new(Bytes::from_static(AGENT_ENGINE_ID), &b"temp"[..]).with_storage(StorageType::Volatile));

    let records = agent.save_user_records();
    assert_eq!(records.len(), 1);
    assert!(records[0].contains("\"kept\""));
}

/// Records for a remote engine make that engine known, with an
/// unauthenticated time record.
#[test]
fn loading_remote_user_registers_engine() {
    let remote = UsmUser::new(&b"\x80\x00\x00\x09\x03remote"[..], &b"trapper"[..])
        .with_passphrases(AuthProtocol::Sha1, AUTH_PASS, PrivProtocol::None, None)
        .unwrap();
    let record = remote.to_record();

    let mut agent = reopen(&[record]);
    let times = agent.usm().times();
    assert!(times.is_known(b"\x80\x00\x00\x09\x03remote"));
    assert_eq!(times.get(b"\x80\x00\x00\x09\x03remote", true), Some((0, 0)));
    assert!(agent.remove_user(b"\x80\x00\x00\x09\x03remote", b"trapper").is_some());
}

#[test]
fn names_with_spaces_and_binary_engine_ids() {
    let user = UsmUser::new(Bytes::from_static(AGENT_ENGINE_ID), &b"two words"[..])
        .with_sec_name(&b"0xdeadbeef"[..])
        .with_public_string(&b"\x00\x01"[..]);
    let record = user.to_record();
    assert!(record.contains("\"two words\""));

    let parsed = UsmUser::from_record(&record).unwrap();
    assert_eq!(parsed.name().as_ref(), b"two words");
    assert_eq!(parsed.sec_name().as_ref(), b"0xdeadbeef");
    assert_eq!(parsed.public_string().as_ref(), b"\x00\x01");
    assert_eq!(parsed.engine_id().as_ref(), AGENT_ENGINE_ID);
}

#[test]
fn malformed_records_are_rejected() {
    let (_, mut agent) = agent_with_clock(BuildStrategy::Reverse);
    for line in [
        "usmUser 1 3",
        "usmUser 9 3 0x0102 \"a\" \"a\" .0.0 .1.3.6.1.6.3.10.1.1.1 \"\" .1.3.6.1.6.3.10.1.2.1 \"\" \"\"",
        "usmUser 1 3 0xzz \"a\" \"a\" .0.0 .1.3.6.1.6.3.10.1.1.1 \"\" .1.3.6.1.6.3.10.1.2.1 \"\" \"\"",
        "usmUser 1 3 0x0102 \"a\" \"a\" .0.0 .1.3.6.1.4.1.9 \"\" .1.3.6.1.6.3.10.1.2.1 \"\" \"\"",
    ] {
        let err = agent.load_user_records([line]).unwrap_err();
        assert!(matches!(*err, Error::UserRecord(_)), "{line}: {err}");
    }
    assert!(agent.usm().users().is_empty());
}

/// Cloning copies transforms and keys from an existing user.
#[test]
fn clone_then_persist() {
    let (_, mut agent) = agent_with_clock(BuildStrategy::Reverse);
    agent
        .create_user_with_passphrases(b"template", AuthProtocol::Sha1, AUTH_PASS, PrivProtocol::Des, Some(PRIV_PASS))
        .unwrap();
    agent.create_user(None, b"newcomer");
    agent
        .clone_user((AGENT_ENGINE_ID, b"newcomer"), (AGENT_ENGINE_ID, b"template"))
        .unwrap();
    assert!(
        agent
            .clone_user((AGENT_ENGINE_ID, b"nobody"), (AGENT_ENGINE_ID, b"template"))
            .is_err()
    );

    let records = agent.close();
    let restored = reopen(&records);
    let users = restored.usm().users();
    let template = users.get(AGENT_ENGINE_ID, b"template").unwrap();
    let newcomer = users.get(AGENT_ENGINE_ID, b"newcomer").unwrap();
    assert_eq!(newcomer.auth_key(), template.auth_key());
    assert_eq!(newcomer.priv_key(), template.priv_key());
    assert_eq!(newcomer.clone_from_oid(), &template.row_pointer());
}
