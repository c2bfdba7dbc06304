// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

// Request handling for the CTP peer runtime.
//
// The runtime dispatches each inbound request to a RequestHandler by type.
// Handlers are a capability set: implementers supply one method per request
// type plus cleanup(), which runs unconditionally after every handler. A
// handler sends at most one response; NO_OP never gets one.

#![forbid(unsafe_code)]

use crate::core::store::manifest::{ManifestStore, MANIFEST_NAME};
use crate::core::store::{FileInfo, FileStore, StoreError};
use crate::core::types::{PeerId, BLOCK_SIZE};
use crate::monitoring::metrics::Metrics;
use crate::networking::frame::{
    self, BlockStatus, MsgType, MAX_PAYLOAD,
};
use crate::networking::peer_table::PeerTable;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One inbound request as seen by a handler.
#[derive(Clone, Debug)]
pub struct Request {
    pub msg_type: MsgType,
    pub seq: u32,
    pub sender: PeerId,
    pub payload: Vec<u8>,
    pub from: SocketAddr,
}

/// At most one response per request: `(type, payload)` or nothing.
pub type Reply = Option<(MsgType, Vec<u8>)>;

/// Capability set invoked by the peer runtime, one method per request type.
///
/// Defaults answer `UNEXPECTED_REQ` so partial implementations (tests,
/// tools) stay honest on the wire.
pub trait RequestHandler: Send + Sync {
    fn handle_status_request(&self, _req: &Request) -> Reply {
        Some((MsgType::StatusResponse, b"1".to_vec()))
    }

    fn handle_notification(&self, _req: &Request) -> Reply {
        Some((MsgType::NotificationAck, b"ok".to_vec()))
    }

    fn handle_block_request(&self, _req: &Request) -> Reply {
        Some((MsgType::UnexpectedReq, b"unhandled".to_vec()))
    }

    fn handle_crinfo_request(&self, _req: &Request) -> Reply {
        Some((MsgType::UnexpectedReq, b"unhandled".to_vec()))
    }

    fn handle_manifest_request(&self, _req: &Request) -> Reply {
        Some((MsgType::UnexpectedReq, b"unhandled".to_vec()))
    }

    fn handle_new_crinfo(&self, _req: &Request) -> Reply {
        Some((MsgType::UnexpectedReq, b"unhandled".to_vec()))
    }

    fn handle_cluster_join(&self, _req: &Request) -> Reply {
        Some((MsgType::UnexpectedReq, b"unhandled".to_vec()))
    }

    fn handle_peerlist_push(&self, _req: &Request) -> Reply {
        Some((MsgType::UnexpectedReq, b"unhandled".to_vec()))
    }

    fn handle_no_op(&self, _req: &Request) {}

    fn handle_unknown_request(&self, _req: &Request) -> Reply {
        Some((MsgType::InvalidRequest, b"unknown message type".to_vec()))
    }

    /// Runs after every handler, response or not.
    fn cleanup(&self) {}
}

/// Route one request to the matching handler method. `NO_OP` never yields
/// a reply.
pub fn dispatch(handler: &dyn RequestHandler, req: &Request) -> Reply {
    match req.msg_type {
        MsgType::StatusRequest => handler.handle_status_request(req),
        MsgType::Notification => handler.handle_notification(req),
        MsgType::BlockRequest => handler.handle_block_request(req),
        MsgType::CrinfoRequest => handler.handle_crinfo_request(req),
        MsgType::ManifestRequest => handler.handle_manifest_request(req),
        MsgType::NewCrinfoNotif => handler.handle_new_crinfo(req),
        MsgType::ClusterJoinRequest => handler.handle_cluster_join(req),
        MsgType::PeerlistPush => handler.handle_peerlist_push(req),
        MsgType::NoOp => {
            handler.handle_no_op(req);
            None
        }
        _ => handler.handle_unknown_request(req),
    }
}

/// The production handler: serves blocks, descriptors, and the manifest
/// from the local store, absorbs peer-list pushes, and nudges the sync
/// engine when a peer announces a manifest change.
pub struct NodeHandler {
    store: Arc<FileStore>,
    manifest: Arc<ManifestStore>,
    peers: Arc<PeerTable>,
    metrics: Arc<Metrics>,
    sync_nudge: mpsc::Sender<()>,
    draining: AtomicBool,
}

impl NodeHandler {
    pub fn new(
        store: Arc<FileStore>,
        manifest: Arc<ManifestStore>,
        peers: Arc<PeerTable>,
        metrics: Arc<Metrics>,
        sync_nudge: mpsc::Sender<()>,
    ) -> Self {
        Self {
            store,
            manifest,
            peers,
            metrics,
            sync_nudge,
            draining: AtomicBool::new(false),
        }
    }

    /// Flip the status answer to `0` while the node shuts down.
    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::Relaxed);
    }

    /// Serve a block of the manifest pseudo-file.
    fn manifest_block(&self, info: &FileInfo, block_id: u32) -> (BlockStatus, Vec<u8>) {
        let Some(expected) = info.block_len(block_id) else {
            return (BlockStatus::InvalidIndex, Vec::new());
        };
        let bytes = self.manifest.serialize();
        let start = block_id as usize * BLOCK_SIZE;
        if start + expected > bytes.len() {
            // Manifest changed since the descriptor was fetched.
            return (BlockStatus::NotHave, Vec::new());
        }
        (BlockStatus::Have, bytes[start..start + expected].to_vec())
    }
}

impl RequestHandler for NodeHandler {
    fn handle_status_request(&self, _req: &Request) -> Reply {
        let status: &[u8] = if self.draining.load(Ordering::Relaxed) {
            b"0"
        } else {
            b"1"
        };
        Some((MsgType::StatusResponse, status.to_vec()))
    }

    fn handle_notification(&self, req: &Request) -> Reply {
        if req.payload == b"manifest updated" {
            // Coalesce: a full nudge queue means an update is already due.
            let _ = self.sync_nudge.try_send(());
        } else {
            debug!(from = %req.from, "notification ignored");
        }
        Some((MsgType::NotificationAck, b"ok".to_vec()))
    }

    fn handle_block_request(&self, req: &Request) -> Reply {
        let Some((hash, block_id)) = frame::parse_block_request(&req.payload) else {
            return Some((MsgType::InvalidRequest, b"bad block request".to_vec()));
        };

        // The manifest is a pseudo-file served through the same machinery.
        if let Ok(info) = self.manifest.descriptor() {
            if info.content_hash == hash {
                let (status, bytes) = self.manifest_block(&info, block_id);
                return Some((
                    MsgType::BlockResponse,
                    frame::encode_block_response(&hash, block_id, status, &bytes),
                ));
            }
        }

        let Some(name) = self.store.lookup_by_hash(&hash) else {
            return Some((
                MsgType::BlockResponse,
                frame::encode_block_response(&hash, block_id, BlockStatus::NotHave, &[]),
            ));
        };

        let in_range = self
            .store
            .get_info(&name)
            .map(|info| block_id < info.block_count())
            .unwrap_or(false);
        if !in_range {
            return Some((
                MsgType::BlockResponse,
                frame::encode_block_response(&hash, block_id, BlockStatus::InvalidIndex, &[]),
            ));
        }

        match self.store.read_block(&name, block_id) {
            Ok(bytes) => {
                self.metrics.blocks_served_total.inc();
                Some((
                    MsgType::BlockResponse,
                    frame::encode_block_response(&hash, block_id, BlockStatus::Have, &bytes),
                ))
            }
            Err(StoreError::NotFound) => Some((
                MsgType::BlockResponse,
                frame::encode_block_response(&hash, block_id, BlockStatus::NotHave, &[]),
            )),
            Err(e) => {
                warn!(name, block_id, err = %e, "block read failed");
                Some((MsgType::ServerError, b"block read failed".to_vec()))
            }
        }
    }

    fn handle_crinfo_request(&self, req: &Request) -> Reply {
        let Some(name) = frame::parse_crinfo_request(&req.payload) else {
            return Some((MsgType::InvalidRequest, b"bad crinfo request".to_vec()));
        };
        if name == MANIFEST_NAME {
            return match self.manifest.descriptor() {
                Ok(info) => Some((MsgType::CrinfoResponse, info.to_bytes())),
                Err(e) => {
                    warn!(err = %e, "manifest descriptor failed");
                    Some((MsgType::ServerError, b"descriptor failed".to_vec()))
                }
            };
        }
        match self.store.get_info(name) {
            Ok(info) => Some((MsgType::CrinfoResponse, info.to_bytes())),
            Err(StoreError::NotFound) => {
                Some((MsgType::InvalidRequest, b"error: not found".to_vec()))
            }
            Err(e) => {
                warn!(name, err = %e, "crinfo read failed");
                Some((MsgType::ServerError, b"crinfo read failed".to_vec()))
            }
        }
    }

    fn handle_manifest_request(&self, _req: &Request) -> Reply {
        match self.manifest.descriptor() {
            Ok(info) => Some((MsgType::ManifestResponse, info.to_bytes())),
            Err(e) => {
                warn!(err = %e, "manifest descriptor failed");
                Some((MsgType::ServerError, b"descriptor failed".to_vec()))
            }
        }
    }

    fn handle_new_crinfo(&self, req: &Request) -> Reply {
        let Some((name, crinfo)) = frame::parse_new_crinfo(&req.payload) else {
            return Some((MsgType::InvalidRequest, b"bad crinfo notif".to_vec()));
        };
        let Ok(info) = FileInfo::parse(crinfo) else {
            return Some((MsgType::InvalidRequest, b"bad crinfo body".to_vec()));
        };
        // Dedupe by filename + digest: a retransmitted notif must stay
        // idempotent.
        match self.store.put_info(name, &info) {
            Ok(()) => {
                match self.manifest.merge(&[name.to_string()]) {
                    Ok(_) => {}
                    Err(e) => warn!(name, err = %e, "manifest merge failed"),
                }
                let _ = self.sync_nudge.try_send(());
                Some((MsgType::NewCrinfoAck, b"success".to_vec()))
            }
            Err(StoreError::AlreadyExists) => {
                Some((MsgType::NewCrinfoAck, b"error: exists".to_vec()))
            }
            Err(e) => {
                warn!(name, err = %e, "crinfo write failed");
                Some((MsgType::ServerError, b"crinfo write failed".to_vec()))
            }
        }
    }

    fn handle_cluster_join(&self, req: &Request) -> Reply {
        self.peers.insert(req.sender, req.from);
        self.metrics.cluster_peers.set(self.peers.snapshot().len() as i64);

        // Cap the ack to one datagram; a joiner gets the rest via refresh.
        let mut entries = self.peers.to_wire();
        let mut payload = frame::encode_peer_list(&entries);
        while payload.len() > MAX_PAYLOAD && !entries.is_empty() {
            entries.pop();
            payload = frame::encode_peer_list(&entries);
        }
        Some((MsgType::ClusterJoinAck, payload))
    }

    fn handle_peerlist_push(&self, req: &Request) -> Reply {
        let list = frame::parse_peer_list(&req.payload);
        if list.is_empty() {
            return Some((MsgType::InvalidRequest, b"empty peer list".to_vec()));
        }
        self.peers.replace(list);
        self.metrics.cluster_peers.set(self.peers.snapshot().len() as i64);
        Some((MsgType::NotificationAck, b"ok".to_vec()))
    }

    fn handle_no_op(&self, req: &Request) {
        debug!(from = %req.from, "no-op");
    }

    fn cleanup(&self) {
        // Nothing to release; per-request scratch is stack-local.
    }
}
