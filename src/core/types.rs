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

//! Core value types and node configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Cluster-wide block size in bytes. Every file is split into blocks of this
/// size (the final block may be shorter). Chosen so a `BLOCK_RESPONSE`
/// payload, including its ASCII framing prefix, stays within the 1335-byte
/// CTP payload bound.
pub const BLOCK_SIZE: usize = 1024;

/// Default UDP port for CTP traffic.
pub const DEFAULT_CTP_PORT: u16 = 6969;

/// Number of blocks needed to cover `file_size` bytes.
pub fn block_count(file_size: u64) -> u32 {
    file_size.div_ceil(BLOCK_SIZE as u64) as u32
}

/// 256-bit value (32 bytes). Used for peer ids, cluster ids, and content
/// digests alike; all three are opaque fixed-width byte strings on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct H256([u8; 32]);

impl H256 {
    /// Construct from raw bytes.
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding (64 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-char hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim()).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(Self(out))
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form: first 4 bytes are enough to tell records apart in logs.
        write!(f, "H256({}..)", hex::encode(&self.0[..4]))
    }
}

/// Peer identity within a cluster. Assigned once, never changes.
pub type PeerId = H256;

/// Cluster identity. Immutable for the cluster's lifetime.
pub type ClusterId = H256;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Cannot read the config file.
    #[error("read config")]
    Read,
    /// Cannot parse TOML.
    #[error("parse config")]
    Parse,
    /// A field failed validation.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Node configuration root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node settings.
    pub node: NodeSettings,
    /// CTP runtime settings.
    #[serde(default)]
    pub ctp: CtpSettings,
    /// Control-server client settings.
    pub control: ControlSettings,
    /// Sync engine settings.
    #[serde(default)]
    pub sync: SyncSettings,
    /// Local observability listener.
    #[serde(default)]
    pub http: HttpSettings,
}

/// Node settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable name.
    pub name: String,
    /// Data directory (identity, scratch).
    pub data_dir: String,
    /// Shared directory owned by this peer (finalized files, crinfo, crtemp,
    /// manifest).
    pub shared_dir: String,
}

/// CTP runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CtpSettings {
    /// UDP bind address, e.g. `0.0.0.0:6969`.
    pub bind_addr: String,
    /// Handler worker pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Inbound request queue depth; overflow is answered with
    /// `UNEXPECTED_REQ "busy"`.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for CtpSettings {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_CTP_PORT}"),
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Control-server client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Base URL of the control server, e.g. `http://10.0.0.1:8000`.
    pub base_url: String,
    /// Cluster id (hex, 32 bytes).
    pub cluster_id_hex: String,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_control_timeout_ms")]
    pub timeout_ms: u64,
}

/// Sync engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Control-server manifest hash poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bound on concurrently acquired files.
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    /// Per-peer block request timeout in milliseconds.
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
    /// Additional retransmissions per block request.
    #[serde(default = "default_block_retries")]
    pub block_retries: u32,
    /// Consecutive timed-out requests before a peer turns suspect.
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_files: default_max_concurrent_files(),
            block_timeout_ms: default_block_timeout_ms(),
            block_retries: default_block_retries(),
            fail_threshold: default_fail_threshold(),
        }
    }
}

/// Observability listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Listen address for `/metrics` and `/healthz`; empty disables the
    /// listener.
    #[serde(default)]
    pub listen_addr: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            listen_addr: String::new(),
        }
    }
}

fn default_workers() -> usize {
    16
}
fn default_queue_depth() -> usize {
    64
}
fn default_control_timeout_ms() -> u64 {
    5_000
}
fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_max_concurrent_files() -> usize {
    8
}
fn default_block_timeout_ms() -> u64 {
    3_000
}
fn default_block_retries() -> u32 {
    2
}
fn default_fail_threshold() -> u32 {
    3
}

/// Load a [`NodeConfig`] from a TOML file.
pub fn load_config(path: &str) -> Result<NodeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::Read)?;
    let cfg: NodeConfig = toml::from_str(&raw).map_err(|_| ConfigError::Parse)?;
    if H256::from_hex(&cfg.control.cluster_id_hex).is_none() {
        return Err(ConfigError::Invalid("cluster_id_hex"));
    }
    Ok(cfg)
}
