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

//! `.crinfo` descriptors.
//!
//! On disk a descriptor is exactly two CRLF-separated ASCII lines:
//!
//! ```text
//! CRINFO {size} {unix_ts}\r\n
//! {hex_hash}
//! ```
//!
//! A file's content digest uniquely identifies it within a cluster; two
//! descriptors sharing a digest describe the same file.

use super::StoreError;
use crate::core::types::{block_count, H256, BLOCK_SIZE};

const MAGIC: &str = "CRINFO";

/// Descriptor for one shared file. Keyed by filename in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileInfo {
    /// Size of the fully assembled file in bytes.
    pub file_size: u64,
    /// Creation time, seconds since the UNIX epoch.
    pub created_at: u64,
    /// Digest over the fully assembled file bytes.
    pub content_hash: H256,
}

impl FileInfo {
    /// Build a descriptor.
    pub fn new(file_size: u64, created_at: u64, content_hash: H256) -> Self {
        Self {
            file_size,
            created_at,
            content_hash,
        }
    }

    /// Number of blocks covering the file.
    pub fn block_count(&self) -> u32 {
        block_count(self.file_size)
    }

    /// Exact byte length of block `block_id`, or `None` when the id is out
    /// of range. Every block is `BLOCK_SIZE` bytes except the final one.
    pub fn block_len(&self, block_id: u32) -> Option<usize> {
        let count = self.block_count();
        if block_id >= count {
            return None;
        }
        if block_id + 1 == count {
            let tail = self.file_size - u64::from(block_id) * BLOCK_SIZE as u64;
            Some(tail as usize)
        } else {
            Some(BLOCK_SIZE)
        }
    }

    /// Serialize to the on-disk / on-wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{MAGIC} {} {}\r\n{}",
            self.file_size,
            self.created_at,
            self.content_hash.to_hex()
        )
        .into_bytes()
    }

    /// Parse the on-disk / on-wire form.
    pub fn parse(bytes: &[u8]) -> Result<Self, StoreError> {
        let text = std::str::from_utf8(bytes).map_err(|_| StoreError::Malformed)?;
        let (header, hash_line) = text.split_once("\r\n").ok_or(StoreError::Malformed)?;
        let mut fields = header.split(' ');
        if fields.next() != Some(MAGIC) {
            return Err(StoreError::Malformed);
        }
        let file_size: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(StoreError::Malformed)?;
        let created_at: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(StoreError::Malformed)?;
        if fields.next().is_some() {
            return Err(StoreError::Malformed);
        }
        let content_hash = H256::from_hex(hash_line.trim_end()).ok_or(StoreError::Malformed)?;
        Ok(Self {
            file_size,
            created_at,
            content_hash,
        })
    }
}
