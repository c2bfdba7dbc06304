// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

// The sync engine drives convergence between this peer's local state and
// the cluster manifest. Three triggers: a local share, a peer's
// "manifest updated" notification, and the periodic manifest-hash poll.
//
// Error containment: one block failing to arrive never aborts its file;
// one file failing never aborts the cycle; a control-server failure aborts
// the cycle and the next poll retries.

#![forbid(unsafe_code)]

use crate::core::store::manifest::{parse_manifest_bytes, ManifestStore};
use crate::core::store::{FileInfo, FileStore, StoreError, TempHandle};
use crate::core::types::{PeerId, SyncSettings};
use crate::monitoring::metrics::Metrics;
use crate::networking::control::{ControlClient, ControlError, PeerEntry};
use crate::networking::frame::{self, BlockStatus, MsgType};
use crate::networking::peer_table::{PeerRecord, PeerTable};
use crate::networking::runtime::{CtpError, CtpRuntime};
use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sync engine errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The file is already in the cluster manifest.
    #[error("already shared")]
    AlreadyShared,
    /// No reachable peer currently holds the block; the next cycle retries.
    #[error("block {block} of {filename} temporarily unavailable")]
    TemporarilyUnavailable {
        /// File awaiting the block.
        filename: String,
        /// First block that could not be obtained.
        block: u32,
    },
    /// No reachable peer served the file's descriptor.
    #[error("crinfo for {0} unavailable")]
    InfoUnavailable(String),
    /// Share path has no usable filename.
    #[error("invalid share path")]
    BadPath,
    /// Control-server failure; aborts the current cycle.
    #[error("control: {0}")]
    Control(#[from] ControlError),
    /// Storage failure.
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// CTP runtime failure other than a per-peer timeout.
    #[error("ctp: {0}")]
    Ctp(#[from] CtpError),
}

/// Outcome of one update cycle.
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Files finalized this cycle.
    pub fetched: Vec<String>,
    /// Files left partial; resumed next cycle.
    pub pending: Vec<String>,
}

/// Orchestrates manifest merges, descriptor fetches, and block acquisition
/// with peer failover and creator-of-file fallback.
pub struct SyncEngine {
    store: Arc<FileStore>,
    manifest: Arc<ManifestStore>,
    peers: Arc<PeerTable>,
    runtime: Arc<CtpRuntime>,
    control: ControlClient,
    metrics: Arc<Metrics>,
    block_timeout: Duration,
    block_retries: u32,
    max_concurrent_files: usize,
    poll_interval: Duration,
}

impl SyncEngine {
    /// Assemble the engine over its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<FileStore>,
        manifest: Arc<ManifestStore>,
        peers: Arc<PeerTable>,
        runtime: Arc<CtpRuntime>,
        control: ControlClient,
        metrics: Arc<Metrics>,
        settings: &SyncSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            manifest,
            peers,
            runtime,
            control,
            metrics,
            block_timeout: Duration::from_millis(settings.block_timeout_ms),
            block_retries: settings.block_retries,
            max_concurrent_files: settings.max_concurrent_files.max(1),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(100)),
        })
    }

    /// Share a local file with the cluster: ingest it into the store,
    /// publish the manifest entry, and notify every known peer.
    pub async fn share(&self, path: &Path) -> Result<FileInfo, SyncError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(SyncError::BadPath)?
            .to_string();

        let info = self.store.ingest(path, &name).map_err(|e| match e {
            StoreError::AlreadyExists => SyncError::AlreadyShared,
            other => SyncError::Store(other),
        })?;

        match self.control.publish(&name, &info).await {
            Ok(_digest) => {}
            Err(ControlError::Duplicate) => return Err(SyncError::AlreadyShared),
            Err(e) => return Err(e.into()),
        }
        self.manifest.merge(&[name.clone()])?;

        info!(name, size = info.file_size, "shared file");
        self.broadcast_manifest_updated().await;
        Ok(info)
    }

    /// Fire-and-forget "manifest updated" to every known peer: one attempt
    /// each, failures ignored.
    async fn broadcast_manifest_updated(&self) {
        let peers = self.peers.snapshot();
        let sends = peers.into_iter().map(|peer| {
            let runtime = Arc::clone(&self.runtime);
            let timeout = self.block_timeout;
            async move {
                let _ = runtime
                    .send_request(
                        MsgType::Notification,
                        b"manifest updated".to_vec(),
                        peer.addr,
                        timeout,
                        0,
                    )
                    .await;
            }
        });
        futures::future::join_all(sends).await;
    }

    /// Refresh the peer table from the control server. Gone records are
    /// evicted here even when the server still lists them.
    pub async fn refresh_peers(&self) -> Result<(), SyncError> {
        let list = self.control.peer_list().await?;
        let own = self.runtime.peer_id();
        let decoded: Vec<_> = list
            .iter()
            .filter_map(PeerEntry::decode)
            .filter(|(id, _)| *id != own)
            .collect();
        self.peers.replace(decoded);
        self.metrics
            .cluster_peers
            .set(self.peers.snapshot().len() as i64);
        Ok(())
    }

    /// One full update cycle: pull the cluster manifest, merge it, and
    /// acquire every listed file not yet finalized locally (bounded
    /// concurrency across files).
    pub async fn update(&self) -> Result<UpdateReport, SyncError> {
        let bytes = self.control.manifest().await?;
        let names = parse_manifest_bytes(&bytes);
        let added = self.manifest.merge(&names)?;
        if !added.is_empty() {
            debug!(?added, "manifest grew");
        }

        let candidates: Vec<String> = self
            .manifest
            .entries()
            .into_iter()
            .filter(|name| !self.store.has_final(name))
            .collect();

        let results: Vec<(String, Result<(), SyncError>)> = stream::iter(candidates)
            .map(|name| self.fetch_one(name))
            .buffer_unordered(self.max_concurrent_files)
            .collect()
            .await;

        let mut report = UpdateReport::default();
        for (name, outcome) in results {
            match outcome {
                Ok(()) => report.fetched.push(name),
                Err(e) => {
                    warn!(name, err = %e, "file left partial this cycle");
                    report.pending.push(name);
                }
            }
        }
        self.metrics.sync_cycles_total.inc();
        Ok(report)
    }

    async fn fetch_one(&self, name: String) -> (String, Result<(), SyncError>) {
        let outcome = self.fetch_file(&name).await;
        (name, outcome)
    }

    /// Bring one file from its manifest entry to a finalized local copy.
    async fn fetch_file(&self, name: &str) -> Result<(), SyncError> {
        let info = match self.store.get_info(name) {
            Ok(info) => info,
            Err(StoreError::NotFound) => self.fetch_crinfo(name).await?,
            Err(e) => return Err(e.into()),
        };

        let mut handle = self.store.open_temp(name, &info)?;

        // Blocks go out in id order; arrival order does not matter, the
        // pointer table absorbs it.
        let mut first_unavailable = None;
        for block in handle.missing_blocks() {
            match self.acquire_block(name, &info, &mut handle, block).await {
                Ok(()) => {}
                Err(SyncError::TemporarilyUnavailable { block, .. }) => {
                    if first_unavailable.is_none() {
                        first_unavailable = Some(block);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(block) = first_unavailable {
            return Err(SyncError::TemporarilyUnavailable {
                filename: name.to_string(),
                block,
            });
        }

        match self.store.finalize(&mut handle) {
            Ok(()) => {
                self.metrics.files_finalized_total.inc();
                info!(name, "file finalized");
                Ok(())
            }
            Err(StoreError::HashMismatch) => {
                // All pointers are cleared; the next cycle re-downloads.
                self.metrics.hash_mismatch_total.inc();
                warn!(name, "finalize digest mismatch; pointers cleared");
                Err(StoreError::HashMismatch.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Obtain the authoritative descriptor for `name` from peers, trying
    /// each in a randomized order.
    async fn fetch_crinfo(&self, name: &str) -> Result<FileInfo, SyncError> {
        let mut candidates = self.peers.snapshot();
        {
            let mut rng = rand::thread_rng();
            candidates.shuffle(&mut rng);
        }

        for peer in candidates {
            match self
                .runtime
                .send_request(
                    MsgType::CrinfoRequest,
                    frame::encode_crinfo_request(name),
                    peer.addr,
                    self.block_timeout,
                    self.block_retries,
                )
                .await
            {
                Ok(resp) => {
                    self.peers.mark_success(&peer.peer_id);
                    if resp.msg_type == MsgType::CrinfoResponse {
                        if let Ok(info) = FileInfo::parse(&resp.payload) {
                            self.store.put_info(name, &info)?;
                            return Ok(info);
                        }
                    }
                    debug!(name, peer = %peer.peer_id, "peer had no descriptor");
                }
                Err(CtpError::ConnectionError) => self.note_failure(&peer.peer_id).await,
                Err(e) => return Err(e.into()),
            }
        }
        Err(SyncError::InfoUnavailable(name.to_string()))
    }

    /// Acquire one block: randomized peer order, then the control server's
    /// creator lookup as last resort.
    async fn acquire_block(
        &self,
        name: &str,
        info: &FileInfo,
        handle: &mut TempHandle,
        block: u32,
    ) -> Result<(), SyncError> {
        let mut candidates = self.peers.snapshot();
        {
            let mut rng = rand::thread_rng();
            candidates.shuffle(&mut rng);
        }

        for peer in &candidates {
            if self.try_block_from(peer, info, handle, block).await? {
                return Ok(());
            }
        }

        // Nobody in the table has it; ask the server who created the file.
        if let Some(entry) = self.control.file_creator(&info.content_hash).await? {
            if let Some((peer_id, addr)) = entry.decode() {
                if peer_id != self.runtime.peer_id() && self.peers.get(&peer_id).is_none() {
                    self.peers.insert(peer_id, addr);
                    self.metrics
                        .cluster_peers
                        .set(self.peers.snapshot().len() as i64);
                    info!(peer = %peer_id, "creator added from control server");
                    if let Some(rec) = self.peers.get(&peer_id) {
                        if self.try_block_from(&rec, info, handle, block).await? {
                            return Ok(());
                        }
                    }
                }
            }
        }

        Err(SyncError::TemporarilyUnavailable {
            filename: name.to_string(),
            block,
        })
    }

    /// One peer, one block. `Ok(true)` when the block was written;
    /// `Ok(false)` when this peer cannot serve it and the next should be
    /// tried.
    async fn try_block_from(
        &self,
        peer: &PeerRecord,
        info: &FileInfo,
        handle: &mut TempHandle,
        block: u32,
    ) -> Result<bool, SyncError> {
        let payload = frame::encode_block_request(&info.content_hash, block);
        match self
            .runtime
            .send_request(
                MsgType::BlockRequest,
                payload,
                peer.addr,
                self.block_timeout,
                self.block_retries,
            )
            .await
        {
            Ok(resp) => {
                self.peers.mark_success(&peer.peer_id);
                if resp.msg_type != MsgType::BlockResponse {
                    return Ok(false);
                }
                let Some((hash, resp_block, status, bytes)) =
                    frame::parse_block_response(&resp.payload)
                else {
                    return Ok(false);
                };
                if hash != info.content_hash || resp_block != block {
                    return Ok(false);
                }
                match status {
                    BlockStatus::Have => {
                        self.store.write_block(handle, block, bytes)?;
                        self.metrics.blocks_fetched_total.inc();
                        Ok(true)
                    }
                    BlockStatus::NotHave | BlockStatus::InvalidIndex => Ok(false),
                }
            }
            Err(CtpError::ConnectionError) => {
                self.note_failure(&peer.peer_id).await;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Count a timeout against a peer; on the alive → suspect transition,
    /// report it to the control server (exactly once) and drop it from the
    /// candidate pool.
    async fn note_failure(&self, peer_id: &PeerId) {
        let Some((_, became_suspect)) = self.peers.mark_failure(peer_id) else {
            return;
        };
        if !became_suspect {
            return;
        }
        if let Err(e) = self.control.wellness_check(peer_id).await {
            warn!(peer = %peer_id, err = %e, "wellness report failed");
        }
        self.peers.mark_reported(peer_id);
        self.metrics
            .cluster_peers
            .set(self.peers.snapshot().len() as i64);
        info!(peer = %peer_id, "peer reported and dropped");
    }

    /// Poll heartbeat: refresh the peer table, compare manifest digests,
    /// and run an update cycle when diverged or when partials remain.
    pub async fn poll_once(&self) -> Result<Option<UpdateReport>, SyncError> {
        self.refresh_peers().await?;
        let server = self.control.manifest_hash().await?;
        let local = self.manifest.digest();
        let incomplete = self
            .manifest
            .entries()
            .iter()
            .any(|name| !self.store.has_final(name));
        if server == local && !incomplete {
            return Ok(None);
        }
        self.update().await.map(Some)
    }

    /// Drive the engine until the nudge channel closes: periodic polls plus
    /// immediate cycles on peer notifications.
    pub async fn run(self: Arc<Self>, mut nudge: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(err = %e, "sync poll failed");
                    }
                }
                msg = nudge.recv() => match msg {
                    Some(()) => {
                        if let Err(e) = self.update().await {
                            warn!(err = %e, "sync update failed");
                        }
                    }
                    None => break,
                },
            }
        }
    }
}
