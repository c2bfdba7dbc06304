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

//! Cruster - a cluster file-sharing peer.
//!
//! This repository provides:
//! - The Cluster Transfer Protocol (CTP): a request/response datagram
//!   protocol with sequence pairing, per-request timeouts and retransmission
//! - A resumable on-disk block store (`.crinfo` descriptors and `.crtemp`
//!   partial-download containers)
//! - A sync engine that converges a peer's local state with the cluster
//!   manifest, with peer failover and creator-of-file fallback
//! - A thin HTTP client for the cluster control server
//! - Monitoring via Prometheus metrics and structured logging

/// Core primitives (types, hashing, block store, sync engine).
pub mod core;
/// Observability (metrics, local metrics listener).
pub mod monitoring;
/// CTP networking stack (frame codec, peer runtime, peer table, control client).
pub mod networking;
