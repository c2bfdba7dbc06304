// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use cruster::core::types::H256;
use cruster::networking::peer_table::{PeerState, PeerTable};
use std::net::SocketAddr;

fn id(byte: u8) -> H256 {
    H256::from_bytes([byte; 32])
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

#[test]
fn one_record_per_peer_id() {
    let table = PeerTable::new(3);
    table.insert(id(1), addr(7001));
    table.insert(id(1), addr(7002));
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(&id(1)).unwrap().addr, addr(7002));
}

#[test]
fn three_consecutive_failures_turn_a_peer_suspect_once() {
    let table = PeerTable::new(3);
    table.insert(id(1), addr(7001));

    assert_eq!(table.mark_failure(&id(1)), Some((PeerState::Alive, false)));
    assert_eq!(table.mark_failure(&id(1)), Some((PeerState::Alive, false)));
    // Third failure performs the transition, exactly once.
    assert_eq!(table.mark_failure(&id(1)), Some((PeerState::Suspect, true)));
    assert_eq!(table.mark_failure(&id(1)), Some((PeerState::Suspect, false)));

    table.mark_reported(&id(1));
    assert_eq!(table.get(&id(1)).unwrap().state, PeerState::Gone);
    assert!(table.snapshot().is_empty());
    assert_eq!(table.mark_failure(&id(1)), Some((PeerState::Gone, false)));
}

#[test]
fn success_resets_the_failure_streak() {
    let table = PeerTable::new(3);
    table.insert(id(1), addr(7001));
    table.mark_failure(&id(1));
    table.mark_failure(&id(1));
    table.mark_success(&id(1));
    // The streak restarts: two more failures stay below the threshold.
    assert_eq!(table.mark_failure(&id(1)), Some((PeerState::Alive, false)));
    assert_eq!(table.mark_failure(&id(1)), Some((PeerState::Alive, false)));
    assert_eq!(table.mark_failure(&id(1)), Some((PeerState::Suspect, true)));
}

#[test]
fn success_revives_a_suspect() {
    let table = PeerTable::new(3);
    table.insert(id(1), addr(7001));
    for _ in 0..3 {
        table.mark_failure(&id(1));
    }
    assert_eq!(table.get(&id(1)).unwrap().state, PeerState::Suspect);
    table.mark_success(&id(1));
    let rec = table.get(&id(1)).unwrap();
    assert_eq!(rec.state, PeerState::Alive);
    assert_eq!(rec.consecutive_failures, 0);
}

#[test]
fn replace_preserves_history_and_evicts_gone() {
    let table = PeerTable::new(3);
    table.insert(id(1), addr(7001));
    table.insert(id(2), addr(7002));
    table.insert(id(3), addr(7003));
    let seen_before = table.get(&id(1)).unwrap().last_seen_at;
    table.mark_failure(&id(2));
    for _ in 0..3 {
        table.mark_failure(&id(3));
    }
    table.mark_reported(&id(3));

    // The refresh lists 1 (new address), 3 (still gone), and a newcomer.
    table.replace(vec![
        (id(1), addr(8001)),
        (id(3), addr(7003)),
        (id(4), addr(7004)),
    ]);

    let one = table.get(&id(1)).unwrap();
    assert_eq!(one.addr, addr(8001));
    assert_eq!(one.last_seen_at, seen_before);

    // 2 was dropped by the refresh, 3 came back as a fresh record.
    assert!(table.get(&id(2)).is_none());
    let three = table.get(&id(3)).unwrap();
    assert_eq!(three.state, PeerState::Alive);
    assert_eq!(three.consecutive_failures, 0);
    assert!(table.get(&id(4)).is_some());
    assert_eq!(table.snapshot().len(), 3);
}

#[test]
fn snapshot_is_a_stable_copy() {
    let table = PeerTable::new(3);
    table.insert(id(1), addr(7001));
    let snap = table.snapshot();
    table.insert(id(2), addr(7002));
    assert_eq!(snap.len(), 1);
    assert_eq!(table.snapshot().len(), 2);
}
