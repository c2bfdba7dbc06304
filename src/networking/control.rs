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

//! Control-server HTTP client.
//!
//! Thin typed wrapper over the control server's endpoints. Every call has a
//! fixed timeout and exactly one retry on transport failure; there is no
//! caching. The control server is trusted (declared non-goal: no byzantine
//! tolerance).

use crate::core::store::FileInfo;
use crate::core::types::{ClusterId, PeerId, H256};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Control-server client errors.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Transport failure after the retry.
    #[error("http transport")]
    Transport,
    /// Non-success status from the server.
    #[error("server status {0}")]
    Status(u16),
    /// Reply body failed to parse.
    #[error("malformed server reply")]
    Malformed,
    /// Manifest entry already present under a different digest.
    #[error("duplicate manifest entry")]
    Duplicate,
}

/// One peer record as the control server reports it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Peer id, hex.
    pub peer_id: String,
    /// IP address literal.
    pub ip: String,
    /// CTP port.
    pub port: u16,
}

impl PeerEntry {
    /// Build from typed parts.
    pub fn from_parts(peer_id: &PeerId, addr: &SocketAddr) -> Self {
        Self {
            peer_id: peer_id.to_hex(),
            ip: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// Decode into typed parts; `None` when any field is malformed.
    pub fn decode(&self) -> Option<(PeerId, SocketAddr)> {
        let id = H256::from_hex(&self.peer_id)?;
        let ip: std::net::IpAddr = self.ip.parse().ok()?;
        Some((id, SocketAddr::new(ip, self.port)))
    }
}

#[derive(Serialize)]
struct WellnessBody {
    peer_id: String,
}

#[derive(Serialize)]
struct PublishBody {
    filename: String,
    crinfo: String,
}

/// HTTP client for one cluster on one control server.
#[derive(Clone)]
pub struct ControlClient {
    http: reqwest::Client,
    base: String,
    cluster_hex: String,
}

impl ControlClient {
    /// Build a client for `cluster` on the server at `base_url`.
    pub fn new(base_url: &str, cluster: &ClusterId, timeout: Duration) -> Result<Self, ControlError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|_| ControlError::Transport)?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
            cluster_hex: cluster.to_hex(),
        })
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/cluster/{}{tail}", self.base, self.cluster_hex)
    }

    /// One retry on transport failure; status checking is the caller's.
    async fn send(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ControlError> {
        for attempt in 0..2 {
            match build().send().await {
                Ok(resp) => return Ok(resp),
                Err(_) if attempt == 0 => continue,
                Err(_) => break,
            }
        }
        Err(ControlError::Transport)
    }

    fn check(resp: &reqwest::Response) -> Result<(), ControlError> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ControlError::Status(status.as_u16()))
        }
    }

    /// `POST /cluster/`: create a cluster; returns its id.
    pub async fn create_cluster(
        base_url: &str,
        timeout: Duration,
    ) -> Result<ClusterId, ControlError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|_| ControlError::Transport)?;
        let url = format!("{}/cluster/", base_url.trim_end_matches('/'));
        let resp = http
            .post(&url)
            .send()
            .await
            .map_err(|_| ControlError::Transport)?;
        if !resp.status().is_success() {
            return Err(ControlError::Status(resp.status().as_u16()));
        }
        let body = resp.text().await.map_err(|_| ControlError::Transport)?;
        H256::from_hex(body.trim()).ok_or(ControlError::Malformed)
    }

    /// `GET /cluster/{id}`: the current peer list.
    pub async fn peer_list(&self) -> Result<Vec<PeerEntry>, ControlError> {
        let url = self.url("");
        let resp = self.send(|| self.http.get(&url)).await?;
        Self::check(&resp)?;
        resp.json().await.map_err(|_| ControlError::Malformed)
    }

    /// `PUT /cluster/{id}/`: join the cluster as `me`.
    pub async fn join(&self, me: &PeerEntry) -> Result<(), ControlError> {
        let url = self.url("/");
        let resp = self.send(|| self.http.put(&url).json(me)).await?;
        Self::check(&resp)
    }

    /// `POST /cluster/{id}/wellness_check`: ask the server to probe a
    /// suspect peer.
    pub async fn wellness_check(&self, peer_id: &PeerId) -> Result<(), ControlError> {
        let url = self.url("/wellness_check");
        let body = WellnessBody {
            peer_id: peer_id.to_hex(),
        };
        let resp = self.send(|| self.http.post(&url).json(&body)).await?;
        Self::check(&resp)
    }

    /// `GET /cluster/{id}/manifestHash`: the server's current manifest
    /// digest. This is the polling heartbeat.
    pub async fn manifest_hash(&self) -> Result<H256, ControlError> {
        let url = self.url("/manifestHash");
        let resp = self.send(|| self.http.get(&url)).await?;
        Self::check(&resp)?;
        let body = resp.text().await.map_err(|_| ControlError::Transport)?;
        H256::from_hex(body.trim()).ok_or(ControlError::Malformed)
    }

    /// `GET /cluster/{id}/manifest`: full serialized manifest bytes.
    pub async fn manifest(&self) -> Result<Vec<u8>, ControlError> {
        let url = self.url("/manifest");
        let resp = self.send(|| self.http.get(&url)).await?;
        Self::check(&resp)?;
        Ok(resp
            .bytes()
            .await
            .map_err(|_| ControlError::Transport)?
            .to_vec())
    }

    /// `POST /cluster/{id}/manifest`: append one entry; returns the new
    /// manifest digest. A conflict (name already taken by another digest)
    /// surfaces as [`ControlError::Duplicate`].
    pub async fn publish(&self, filename: &str, info: &FileInfo) -> Result<H256, ControlError> {
        let url = self.url("/manifest");
        let body = PublishBody {
            filename: filename.to_string(),
            crinfo: String::from_utf8_lossy(&info.to_bytes()).into_owned(),
        };
        let resp = self.send(|| self.http.post(&url).json(&body)).await?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Err(ControlError::Duplicate);
        }
        Self::check(&resp)?;
        let text = resp.text().await.map_err(|_| ControlError::Transport)?;
        H256::from_hex(text.trim()).ok_or(ControlError::Malformed)
    }

    /// `GET /cluster/{id}/getFileCreator?fileId={h}`: the creator of a
    /// file, as a plain-text `{peer_id} {ip} {port}` record, or empty when
    /// the server does not know.
    pub async fn file_creator(&self, file_id: &H256) -> Result<Option<PeerEntry>, ControlError> {
        let url = format!("{}?fileId={}", self.url("/getFileCreator"), file_id.to_hex());
        let resp = self.send(|| self.http.get(&url)).await?;
        Self::check(&resp)?;
        let body = resp.text().await.map_err(|_| ControlError::Transport)?;
        let line = body.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let mut fields = line.split_whitespace();
        let (Some(id), Some(ip), Some(port)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(ControlError::Malformed);
        };
        if fields.next().is_some() {
            return Err(ControlError::Malformed);
        }
        let entry = PeerEntry {
            peer_id: id.to_string(),
            ip: ip.to_string(),
            port: port.parse().map_err(|_| ControlError::Malformed)?,
        };
        Ok(Some(entry))
    }
}
