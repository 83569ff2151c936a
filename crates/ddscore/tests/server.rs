// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery through a server: relay, relay exclusion, expiry and backup.

mod common;

use std::time::Duration;

use common::{capture, fast_config, prefix, record_subject, server_ref, Net};
use ddscore::{
    DiscoveryEvent, DiscoveryRole, Guid, Locator, LoopbackHub, Participant, ParticipantKind, QoS,
    RemovalReason,
};

const SERVER: u8 = 10;

fn server() -> ddscore::ParticipantConfig {
    fast_config(DiscoveryRole::Server {
        peer_servers: vec![],
    })
}

fn client() -> ddscore::ParticipantConfig {
    fast_config(DiscoveryRole::Client {
        servers: vec![server_ref(SERVER)],
    })
}

/// Server plus two clients, each client with one endpoint on "Square".
fn star(net: &mut Net) -> (usize, usize, usize) {
    let s = net.add(SERVER, server());
    let c1 = net.add(1, client());
    let c2 = net.add(2, client());
    net.run(Duration::from_millis(500));
    (s, c1, c2)
}

#[test]
fn test_clients_discover_each_other_through_the_server() {
    let mut net = Net::new();
    let log = capture(&net.hub, |_| false);
    let (s, c1, c2) = star(&mut net);

    let c1_guid = net.node(c1).guid();
    let c2_guid = net.node(c2).guid();
    assert!(net.node(c2).participant.contains_alive(&c1_guid));
    assert!(net.node(c1).participant.contains_alive(&c2_guid));
    net.node(c2).participant.with_engine(|engine| {
        assert_eq!(engine.database().relayed_participants(), vec![prefix(1)]);
        assert_eq!(engine.database().direct_participants(), vec![prefix(SERVER)]);
    });

    let writer = net
        .node(c1)
        .participant
        .create_writer("Square", "ShapeType", QoS::reliable())
        .expect("writer");
    let reader = net
        .node(c2)
        .participant
        .create_reader("Square", "ShapeType", QoS::reliable())
        .expect("reader");
    net.run(Duration::from_millis(500));
    assert_eq!(writer.matched_readers(), vec![reader.guid()]);
    assert!(net.node(s).participant.find_proxy(&writer.guid()).is_some());

    writer.write(b"direct").expect("write");
    net.run(Duration::from_millis(100));
    assert_eq!(reader.take().len(), 1);

    // Nothing the server learned from a client is sent back to it.
    let server_locator = Locator::loopback(u32::from(SERVER));
    for (client, client_prefix) in [(c1, prefix(1)), (c2, prefix(2))] {
        let client_locator = Locator::loopback(net.node(client).id);
        let echoed = log.lock().iter().any(|seen| {
            seen.from == server_locator
                && seen.to == client_locator
                && record_subject(&seen.submessage) == Some(client_prefix)
        });
        assert!(!echoed, "server echoed a record back to {}", client_prefix);
    }
}

#[test]
fn test_server_announces_client_expiry() {
    let mut net = Net::new();
    let (_s, c1, c2) = star(&mut net);
    let c1_guid = net.node(c1).guid();
    net.node(c2).drain();

    net.hub.disconnect(1);
    net.run(Duration::from_secs(4));

    assert!(!net.node(c2).participant.contains_alive(&c1_guid));
    let removed = net.node(c2).drain().into_iter().any(|e| {
        matches!(e, DiscoveryEvent::ParticipantRemoved { guid, reason: RemovalReason::Disposed }
            if guid == c1_guid)
    });
    assert!(removed, "the server's expiry dispose reaches the other client");

    net.hub.reconnect(1);
    net.run(Duration::from_secs(2));
    assert!(
        net.node(c2).participant.contains_alive(&c1_guid),
        "expiry does not tombstone: the client comes back"
    );
}

#[test]
fn test_relayed_participants_follow_their_server() {
    let mut net = Net::new();
    let (s, c1, c2) = star(&mut net);
    let c1_guid = net.node(c1).guid();
    let server_guid = net.node(s).guid();
    net.node(c2).drain();

    net.hub.disconnect(u32::from(SERVER));
    net.run(Duration::from_secs(4));

    let events = net.node(c2).drain();
    let lost = |guid: Guid, reason: RemovalReason| {
        events.iter().any(|e| {
            matches!(e, DiscoveryEvent::ParticipantRemoved { guid: g, reason: r }
                if *g == guid && *r == reason)
        })
    };
    assert!(lost(server_guid, RemovalReason::LeaseExpired));
    assert!(lost(c1_guid, RemovalReason::RelayLost));
    assert!(net.node(c2).participant.discovered_participants().is_empty());
}

#[test]
fn test_backup_server_restores_its_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("discovery.json");

    let mut net = Net::new();
    let backup_role = DiscoveryRole::Backup {
        peer_servers: vec![],
    };
    let s = net.add(SERVER, fast_config(backup_role.clone()).with_backup_file(path.clone()));
    let c1 = net.add(1, client());
    net.run(Duration::from_millis(500));
    let writer = net
        .node(c1)
        .participant
        .create_writer("Square", "ShapeType", QoS::reliable())
        .expect("writer");
    net.run(Duration::from_millis(300));
    assert!(net.node(s).participant.find_proxy(&writer.guid()).is_some());

    net.node(s).participant.shutdown().expect("shutdown writes the backup");
    assert!(path.exists());

    let hub = LoopbackHub::new();
    let restored = Participant::builder("restored")
        .config(fast_config(backup_role).with_backup_file(path.clone()))
        .guid_prefix(prefix(SERVER))
        .transport(hub.attach(u32::from(SERVER), &[]).expect("attach"))
        .build()
        .expect("build");
    assert_eq!(restored.kind(), ParticipantKind::Backup);
    restored.start(net.now).expect("start");

    let c1_guid = net.node(c1).guid();
    assert!(restored.contains_alive(&c1_guid), "client restored from backup");
    assert!(restored.find_proxy(&writer.guid()).is_some());

    // Nobody announces on the new hub, so the restored lease runs out.
    restored.tick(net.now + Duration::from_secs(4));
    assert!(!restored.contains_alive(&c1_guid));
}

#[test]
fn test_two_servers_do_not_relay_back() {
    let mut net = Net::new();
    let log = capture(&net.hub, |_| false);
    let peer = |other: u8| {
        fast_config(DiscoveryRole::Server {
            peer_servers: vec![server_ref(other)],
        })
    };
    let s1 = net.add(SERVER, peer(20));
    let s2 = net.add(20, peer(SERVER));
    let p = net.add(1, client());
    let q = net.add(
        2,
        fast_config(DiscoveryRole::Client {
            servers: vec![server_ref(20)],
        }),
    );
    net.run(Duration::from_secs(1));

    let p_guid = net.node(p).guid();
    let q_guid = net.node(q).guid();
    assert!(net.node(s2).participant.contains_alive(&p_guid));
    assert!(net.node(s1).participant.contains_alive(&q_guid));
    assert!(
        net.node(q).participant.contains_alive(&p_guid),
        "the far client still learns about the near one"
    );

    let s1_locator = Locator::loopback(u32::from(SERVER));
    let s2_locator = Locator::loopback(20);
    let echoed = log.lock().iter().any(|seen| {
        seen.from == s2_locator
            && seen.to == s1_locator
            && record_subject(&seen.submessage) == Some(prefix(1))
    });
    assert!(!echoed, "S2 sent S1's own client back to it");
}
