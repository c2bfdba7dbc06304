// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Known non-gone peers gauge.
    pub cluster_peers: IntGauge,

    /// Outbound CTP requests issued.
    pub ctp_requests_total: IntCounter,
    /// Retransmitted request datagrams.
    pub ctp_retransmits_total: IntCounter,
    /// Requests that exhausted their retries.
    pub ctp_timeouts_total: IntCounter,
    /// Dropped inbound datagrams (malformed or wrong cluster).
    pub ctp_invalid_frames_total: IntCounter,
    /// Inbound requests rejected with a busy reply.
    pub ctp_busy_rejected_total: IntCounter,

    /// Blocks served to remote peers.
    pub blocks_served_total: IntCounter,
    /// Blocks fetched from remote peers.
    pub blocks_fetched_total: IntCounter,
    /// Files promoted from partial to final.
    pub files_finalized_total: IntCounter,
    /// Finalizations rejected on digest mismatch.
    pub hash_mismatch_total: IntCounter,
    /// Completed sync cycles.
    pub sync_cycles_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let cluster_peers = IntGauge::new("cruster_cluster_peers", "Known non-gone peers")
            .map_err(|_| MetricsError::Prom)?;

        let ctp_requests_total =
            IntCounter::new("cruster_ctp_requests_total", "Outbound CTP requests")
                .map_err(|_| MetricsError::Prom)?;
        let ctp_retransmits_total = IntCounter::new(
            "cruster_ctp_retransmits_total",
            "Retransmitted request datagrams",
        )
        .map_err(|_| MetricsError::Prom)?;
        let ctp_timeouts_total = IntCounter::new(
            "cruster_ctp_timeouts_total",
            "Requests that exhausted retries",
        )
        .map_err(|_| MetricsError::Prom)?;
        let ctp_invalid_frames_total = IntCounter::new(
            "cruster_ctp_invalid_frames_total",
            "Dropped inbound datagrams",
        )
        .map_err(|_| MetricsError::Prom)?;
        let ctp_busy_rejected_total = IntCounter::new(
            "cruster_ctp_busy_rejected_total",
            "Requests rejected with busy",
        )
        .map_err(|_| MetricsError::Prom)?;

        let blocks_served_total =
            IntCounter::new("cruster_blocks_served_total", "Blocks served to peers")
                .map_err(|_| MetricsError::Prom)?;
        let blocks_fetched_total =
            IntCounter::new("cruster_blocks_fetched_total", "Blocks fetched from peers")
                .map_err(|_| MetricsError::Prom)?;
        let files_finalized_total =
            IntCounter::new("cruster_files_finalized_total", "Files finalized")
                .map_err(|_| MetricsError::Prom)?;
        let hash_mismatch_total = IntCounter::new(
            "cruster_hash_mismatch_total",
            "Finalizations rejected on digest mismatch",
        )
        .map_err(|_| MetricsError::Prom)?;
        let sync_cycles_total =
            IntCounter::new("cruster_sync_cycles_total", "Completed sync cycles")
                .map_err(|_| MetricsError::Prom)?;

        for collector in [
            Box::new(cluster_peers.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(ctp_requests_total.clone()),
            Box::new(ctp_retransmits_total.clone()),
            Box::new(ctp_timeouts_total.clone()),
            Box::new(ctp_invalid_frames_total.clone()),
            Box::new(ctp_busy_rejected_total.clone()),
            Box::new(blocks_served_total.clone()),
            Box::new(blocks_fetched_total.clone()),
            Box::new(files_finalized_total.clone()),
            Box::new(hash_mismatch_total.clone()),
            Box::new(sync_cycles_total.clone()),
        ] {
            registry.register(collector).map_err(|_| MetricsError::Prom)?;
        }

        Ok(Self {
            registry,
            cluster_peers,
            ctp_requests_total,
            ctp_retransmits_total,
            ctp_timeouts_total,
            ctp_invalid_frames_total,
            ctp_busy_rejected_total,
            blocks_served_total,
            blocks_fetched_total,
            files_finalized_total,
            hash_mismatch_total,
            sync_cycles_total,
        })
    }
}
