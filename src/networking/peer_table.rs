// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

//! Peer liveness registry.
//!
//! The peer table is the single source of truth for "who can I ask for
//! blocks". The control server's peer list is merged in via [`PeerTable::replace`];
//! request outcomes feed back through `mark_success` / `mark_failure`.

#![forbid(unsafe_code)]

use crate::core::types::PeerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::SystemTime;

/// Liveness state of a known peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// Responding normally.
    Alive,
    /// Hit the consecutive-timeout threshold; pending a wellness report.
    Suspect,
    /// Reported to the control server; evicted on the next peer-list
    /// refresh and excluded from snapshots.
    Gone,
}

/// One known peer.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
    pub last_seen_at: SystemTime,
    pub state: PeerState,
    pub consecutive_failures: u32,
}

/// Thread-safe `peer_id -> record` map. Critical sections are O(1) apart
/// from snapshot/replace, which copy.
pub struct PeerTable {
    inner: Mutex<HashMap<PeerId, PeerRecord>>,
    fail_threshold: u32,
}

impl PeerTable {
    /// Create a table that turns a peer suspect after `fail_threshold`
    /// consecutive timed-out requests.
    pub fn new(fail_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            fail_threshold: fail_threshold.max(1),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, PeerRecord>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or refresh a peer. An existing record keeps its failure history;
    /// a new one starts alive. At most one record per peer id.
    pub fn insert(&self, peer_id: PeerId, addr: SocketAddr) {
        let mut map = self.locked();
        map.entry(peer_id)
            .and_modify(|rec| rec.addr = addr)
            .or_insert_with(|| PeerRecord {
                peer_id,
                addr,
                last_seen_at: SystemTime::now(),
                state: PeerState::Alive,
                consecutive_failures: 0,
            });
    }

    /// Look up one record.
    pub fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.locked().get(peer_id).cloned()
    }

    /// Number of records, gone peers included.
    pub fn len(&self) -> usize {
        self.locked().len()
    }

    /// Whether the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    /// Point-in-time copy of every peer that may still be asked for blocks
    /// (gone peers excluded). Safe to iterate outside the lock.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.locked()
            .values()
            .filter(|rec| rec.state != PeerState::Gone)
            .cloned()
            .collect()
    }

    /// Record a successful response: failures reset, state back to alive.
    pub fn mark_success(&self, peer_id: &PeerId) {
        if let Some(rec) = self.locked().get_mut(peer_id) {
            rec.consecutive_failures = 0;
            rec.state = PeerState::Alive;
            rec.last_seen_at = SystemTime::now();
        }
    }

    /// Record a timed-out request. Returns the state after the call plus
    /// whether this call performed the alive → suspect transition (true at
    /// most once per transition, so the wellness report fires exactly once
    /// even under concurrent acquisitions).
    pub fn mark_failure(&self, peer_id: &PeerId) -> Option<(PeerState, bool)> {
        let mut map = self.locked();
        let rec = map.get_mut(peer_id)?;
        if rec.state == PeerState::Gone {
            return Some((PeerState::Gone, false));
        }
        rec.consecutive_failures += 1;
        if rec.state == PeerState::Alive && rec.consecutive_failures >= self.fail_threshold {
            rec.state = PeerState::Suspect;
            return Some((PeerState::Suspect, true));
        }
        Some((rec.state, false))
    }

    /// Mark a suspect peer as reported to the control server.
    pub fn mark_reported(&self, peer_id: &PeerId) {
        if let Some(rec) = self.locked().get_mut(peer_id) {
            rec.state = PeerState::Gone;
        }
    }

    /// Atomically swap in a fresh peer list. Records that persist keep
    /// their `last_seen_at` and failure history; gone records are evicted
    /// even when re-listed.
    pub fn replace(&self, peers: Vec<(PeerId, SocketAddr)>) {
        let mut map = self.locked();
        let old = std::mem::take(&mut *map);
        for (peer_id, addr) in peers {
            let rec = match old.get(&peer_id) {
                Some(prev) if prev.state != PeerState::Gone => PeerRecord {
                    addr,
                    ..prev.clone()
                },
                _ => PeerRecord {
                    peer_id,
                    addr,
                    last_seen_at: SystemTime::now(),
                    state: PeerState::Alive,
                    consecutive_failures: 0,
                },
            };
            map.insert(peer_id, rec);
        }
    }

    /// Wire form for `CLUSTER_JOIN_ACK` / `PEERLIST_PUSH` payloads.
    pub fn to_wire(&self) -> Vec<(PeerId, SocketAddr)> {
        self.snapshot()
            .into_iter()
            .map(|rec| (rec.peer_id, rec.addr))
            .collect()
    }
}
