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

//! The cluster manifest: an ordered, append-only list of filenames.
//!
//! Serialized as CRLF-separated ASCII names. The manifest is itself a
//! pseudo-file with its own `.crinfo`, so peers can transfer it through the
//! same block machinery as any other file; merging invalidates the
//! descriptor, which is regenerated lazily from current content.

use super::{write_atomic, FileInfo, StoreError};
use crate::core::hash::digest_bytes;
use crate::core::types::H256;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Pseudo-filename of the manifest within its directory.
pub const MANIFEST_NAME: &str = ".crmanifest";

/// Split serialized manifest bytes into entries. Tolerates a trailing
/// newline; blank lines are skipped.
pub fn parse_manifest_bytes(bytes: &[u8]) -> Vec<String> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Vec::new();
    };
    text.split("\r\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Store for the manifest and its descriptor, rooted at the shared
/// directory's `manifest/` subtree.
pub struct ManifestStore {
    dir: PathBuf,
    entries: Mutex<Vec<String>>,
}

impl ManifestStore {
    /// Open the manifest store at `dir` (usually `{shared_dir}/manifest`),
    /// loading any previously persisted entries.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("crinfo"))?;
        let path = dir.join(MANIFEST_NAME);
        let entries = if path.exists() {
            parse_manifest_bytes(&fs::read(&path)?)
        } else {
            Vec::new()
        };
        Ok(Self {
            dir,
            entries: Mutex::new(entries),
        })
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_NAME)
    }

    fn descriptor_path(&self) -> PathBuf {
        self.dir.join("crinfo").join(format!("{MANIFEST_NAME}.crinfo"))
    }

    /// Point-in-time copy of the entry list.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether `name` is already listed.
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|e| e == name)
    }

    /// Serialized manifest bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.join("\r\n").into_bytes()
    }

    /// Digest of the serialized manifest.
    pub fn digest(&self) -> H256 {
        digest_bytes(&self.serialize())
    }

    /// Append entries not yet present, preserving their incoming order, and
    /// return the newly added names. Never removes an entry; idempotent on
    /// already-known input (a no-op merge leaves the descriptor intact).
    pub fn merge(&self, incoming: &[String]) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let known: HashSet<&str> = entries.iter().map(String::as_str).collect();

        let mut added = Vec::new();
        for name in incoming {
            let name = name.trim();
            if name.is_empty() || known.contains(name) || added.iter().any(|a| a == name) {
                continue;
            }
            if name.contains(['/', '\\']) || name.chars().any(char::is_control) {
                warn!(name, "rejecting manifest entry with unsafe name");
                continue;
            }
            added.push(name.to_string());
        }
        if added.is_empty() {
            return Ok(added);
        }

        entries.extend(added.iter().cloned());
        write_atomic(&self.manifest_path(), entries.join("\r\n").as_bytes())?;
        // Content changed: the old descriptor no longer matches.
        let _ = fs::remove_file(self.descriptor_path());
        Ok(added)
    }

    /// Descriptor for the manifest pseudo-file, regenerated from current
    /// content when missing or stale.
    pub fn descriptor(&self) -> Result<FileInfo, StoreError> {
        let serialized = self.serialize();
        let digest = digest_bytes(&serialized);

        let path = self.descriptor_path();
        if path.exists() {
            if let Ok(existing) = FileInfo::parse(&fs::read(&path)?) {
                if existing.content_hash == digest {
                    return Ok(existing);
                }
            }
        }

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let info = FileInfo::new(serialized.len() as u64, created_at, digest);
        write_atomic(&path, &info.to_bytes())?;
        Ok(info)
    }
}
