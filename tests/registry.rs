//! Registry scenarios over a MIB-II style layout.

use std::time::Duration;

use snmp_agent_core::agent::{AgentConfig, AgentSecurityState};
use snmp_agent_core::registry::{RangeSpec, RegistrationRequest, Registry, RegistryStatus, Variable};
use snmp_agent_core::{Oid, oid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    System,
    SysDescr,
    Interfaces,
    IfColumn,
    Subagent,
}

fn system() -> Oid {
    oid!(1, 3, 6, 1, 2, 1, 1)
}

fn mib2() -> Registry<Handler> {
    let mut registry = Registry::new();
    let requests = [
        RegistrationRequest::new("system", system(), Handler::System),
        RegistrationRequest::new("sysDescr", oid!(1, 3, 6, 1, 2, 1, 1, 1), Handler::SysDescr).priority(100),
        RegistrationRequest::new("interfaces", oid!(1, 3, 6, 1, 2, 1, 2), Handler::Interfaces),
        RegistrationRequest::new("ifEntry", oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1), Handler::IfColumn).range(10, 22),
        RegistrationRequest::new("netSnmp", oid!(1, 3, 6, 1, 4, 1, 8072), Handler::Subagent)
            .timeout(Duration::from_secs(5)),
    ];
    for request in requests {
        assert_eq!(registry.register("", request), RegistryStatus::RegisteredOk);
    }
    registry
}

fn handler_at(registry: &mut Registry<Handler>, oid: &Oid) -> Option<Handler> {
    registry.resolve("", oid).and_then(|s| s.handler().copied())
}

#[test]
fn mib2_lookups() {
    let mut registry = mib2();
    let cases = [
        (oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Some(Handler::SysDescr)),
        (oid!(1, 3, 6, 1, 2, 1, 1, 5, 0), Some(Handler::System)),
        (oid!(1, 3, 6, 1, 2, 1, 2, 1, 0), Some(Handler::Interfaces)),
        (oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 10, 3), Some(Handler::IfColumn)),
        (oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 22, 1), Some(Handler::IfColumn)),
        (oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 23, 1), Some(Handler::Interfaces)),
        (oid!(1, 3, 6, 1, 4, 1, 8072, 3, 2), Some(Handler::Subagent)),
        (oid!(1, 3, 6, 1, 2, 1, 3), None),
        (oid!(0, 0), None),
    ];
    for (probe, expected) in cases {
        assert_eq!(handler_at(&mut registry, &probe), expected, "{probe}");
    }

    let subagent = registry.resolve("", &oid!(1, 3, 6, 1, 4, 1, 8072, 1)).unwrap();
    assert_eq!(subagent.timeout(), Some(Duration::from_secs(5)));
    assert_eq!(subagent.label(), "netSnmp");
    assert!(subagent.is_attached());
}

/// Walking with `find_next` visits every registered slot once, in order.
#[test]
fn next_walk_visits_each_slot() {
    let mut registry = mib2();
    let mut cursor = registry.find_first("").map(|s| s.start().clone());
    let mut visited = Vec::new();
    while let Some(start) = cursor {
        let slot = registry.find("", &start).unwrap();
        visited.push((slot.start().clone(), slot.label().to_string()));
        cursor = registry.find_next("", &start).map(|s| s.start().clone());
    }

    assert!(visited.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(visited.first().unwrap().1, "system");
    assert_eq!(visited.last().unwrap().1, "netSnmp");
    // every ifEntry column is its own slot
    assert_eq!(visited.iter().filter(|(_, label)| label == "ifEntry").count(), 22);
}

#[test]
fn nested_split_partitions_variables() {
    let mut registry = Registry::new();
    let variables = vec![Variable::new([1, 0]), Variable::new([2, 0]), Variable::new([3, 0])];
    registry.register("", RegistrationRequest::new("system", system(), 1u8).variables(variables));
    registry.register("", RegistrationRequest::new("sysObjectID", system().child(2), 2u8).priority(50));

    let fragment = |registry: &mut Registry<u8>, probe: Oid| {
        registry
            .registrations_at("", &probe)
            .into_iter()
            .find(|s| s.label() == "system")
            .map(|s| s.variables().iter().map(|v| v.suffix().to_vec()).collect::<Vec<_>>())
            .unwrap()
    };
    assert_eq!(fragment(&mut registry, system().child(1)), vec![vec![1, 0]]);
    assert_eq!(fragment(&mut registry, system().child(2)), vec![vec![2, 0]]);
    assert_eq!(fragment(&mut registry, system().child(3)), vec![vec![3, 0]]);

    assert_eq!(registry.unregister("", &system().child(2), 50, None), RegistryStatus::UnregisteredOk);
    assert_eq!(registry.join_adjacent(""), 2);
    let whole = registry.find("", &system().child(2)).unwrap();
    assert_eq!(whole.start(), &system());
    assert_eq!(whole.variables().len(), 3);
}

#[test]
fn range_unregister_is_partial_tolerant() {
    let mut registry = mib2();
    let root = oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1);

    // a range reaching past what was registered still removes the members
    assert_eq!(
        registry.unregister("", &root, 127, Some(RangeSpec::new(10, 30))),
        RegistryStatus::UnregisteredOk
    );
    assert_eq!(
        handler_at(&mut registry, &oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 5, 1)),
        Some(Handler::Interfaces)
    );
    assert_eq!(
        registry.unregister("", &root, 127, Some(RangeSpec::new(10, 30))),
        RegistryStatus::NoSuchRegistration
    );
}

#[test]
fn unregister_needs_matching_priority() {
    let mut registry = mib2();
    let descr = oid!(1, 3, 6, 1, 2, 1, 1, 1);
    assert_eq!(registry.unregister("", &descr, 127, None), RegistryStatus::NoSuchRegistration);
    assert_eq!(registry.unregister("", &descr, 100, None), RegistryStatus::UnregisteredOk);
    assert_eq!(handler_at(&mut registry, &descr.child(0)), Some(Handler::System));
    assert_eq!(registry.unregister("bogus", &descr, 100, None), RegistryStatus::NoSuchRegistration);
}

/// Lookups give the same answers with the cache on, off, or resized
/// between registrations.
#[test]
fn cache_settings_are_transparent() {
    let probes = [
        oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
        oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 7, 1),
        oid!(1, 3, 6, 1, 2, 1, 1, 4, 0),
        oid!(1, 3, 6, 1, 4, 1, 8072, 9),
        oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 7, 2),
    ];
    let mut reference = mib2();
    reference.set_lookup_cache_size(0);
    let expected: Vec<_> = probes.iter().map(|p| handler_at(&mut reference, p)).collect();

    for size in [-1, 1, 4, 32, 1000] {
        let mut registry = mib2();
        registry.set_lookup_cache_size(size);
        for _ in 0..3 {
            let got: Vec<_> = probes.iter().map(|p| handler_at(&mut registry, p)).collect();
            assert_eq!(got, expected, "cache size {size}");
        }
        registry.register(
            "",
            RegistrationRequest::new("sysContact", oid!(1, 3, 6, 1, 2, 1, 1, 4), Handler::SysDescr),
        );
        assert_eq!(
            handler_at(&mut registry, &oid!(1, 3, 6, 1, 2, 1, 1, 4, 0)),
            Some(Handler::SysDescr),
            "cache size {size}"
        );
    }
}

#[test]
fn agent_applies_configured_cache_size() {
    let config = AgentConfig::builder(b"\x80\x00\x1f\x88\x80registry".to_vec())
        .lookup_cache_size(0)
        .build()
        .unwrap();
    let mut agent = AgentSecurityState::open(config).unwrap();
    assert_eq!(agent.registry().lookup_cache_size(), 0);

    agent.register("", RegistrationRequest::new("system", system(), Handler::System));
    assert_eq!(agent.resolve("", &system().child(3)), Some(&Handler::System));
    agent.set_lookup_cache_size(16);
    assert_eq!(agent.registry().lookup_cache_size(), 16);
    assert_eq!(agent.resolve("", &system().child(3)), Some(&Handler::System));
    assert_eq!(agent.unregister("", &system(), 127, None), RegistryStatus::UnregisteredOk);
    assert_eq!(agent.resolve("", &system().child(3)), None);
}
