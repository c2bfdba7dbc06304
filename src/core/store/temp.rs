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

//! `.crtemp` partial-download containers.
//!
//! Layout:
//!
//! ```text
//! CRTEMP {block_count}\r\n
//! {block_pointers}\r\n\r\n
//! {packed block data}
//! ```
//!
//! The pointer table holds one little-endian `i32` per block: the byte
//! offset of that block within the packed data region, or `-1` while the
//! block is absent. Blocks are appended in arrival order; the pointer table
//! makes out-of-order receipt safe and the whole container resumable across
//! restarts.

use super::{FileInfo, StoreError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAGIC: &str = "CRTEMP";
const TABLE_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Pointer value for an absent block.
const ABSENT: i32 = -1;

/// Parsed `.crtemp` header: block count and pointer table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TempHeader {
    /// Number of blocks in the container.
    pub block_count: u32,
    /// Data-region offset per block, `-1` when absent.
    pub pointers: Vec<i32>,
}

impl TempHeader {
    /// Byte length of the serialized header for `block_count` blocks.
    pub fn encoded_len(block_count: u32) -> u64 {
        prefix(block_count).len() as u64 + 4 * u64::from(block_count) + TABLE_TERMINATOR.len() as u64
    }
}

fn prefix(block_count: u32) -> String {
    format!("{MAGIC} {block_count}\r\n")
}

/// Parse a `.crtemp` header from the front of `bytes`.
///
/// Only the header is inspected; packed data may follow. Exposed so the
/// parser can be exercised standalone (fuzzing).
pub fn parse_temp_header(bytes: &[u8]) -> Result<TempHeader, StoreError> {
    let line_end = bytes
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or(StoreError::Malformed)?;
    let line = std::str::from_utf8(&bytes[..line_end]).map_err(|_| StoreError::Malformed)?;
    let count_str = line.strip_prefix(MAGIC).ok_or(StoreError::Malformed)?;
    let block_count: u32 = count_str
        .strip_prefix(' ')
        .and_then(|s| s.parse().ok())
        .ok_or(StoreError::Malformed)?;

    let table_start = line_end + 2;
    let table_len = (block_count as usize)
        .checked_mul(4)
        .ok_or(StoreError::Malformed)?;
    let table_end = table_start
        .checked_add(table_len)
        .ok_or(StoreError::Malformed)?;
    let term_end = table_end
        .checked_add(TABLE_TERMINATOR.len())
        .ok_or(StoreError::Malformed)?;
    if bytes.len() < term_end || &bytes[table_end..term_end] != TABLE_TERMINATOR {
        return Err(StoreError::Malformed);
    }

    let mut pointers = Vec::with_capacity(block_count as usize);
    for i in 0..block_count as usize {
        let at = table_start + 4 * i;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[at..at + 4]);
        pointers.push(i32::from_le_bytes(raw));
    }
    Ok(TempHeader {
        block_count,
        pointers,
    })
}

/// Open handle onto one `.crtemp` container.
///
/// The handle caches the pointer table; every mutation is written through to
/// disk before the cache is updated. Locking is the owning store's job: all
/// mutations go through [`super::FileStore`], which holds the per-file
/// exclusive lock for the duration of the call.
#[derive(Debug)]
pub struct TempHandle {
    filename: String,
    info: FileInfo,
    path: PathBuf,
    pointers: Vec<i32>,
    data_len: u64,
}

impl TempHandle {
    /// Create or reopen the container at `path` for `filename`. Creating
    /// initializes every pointer to `-1`; reopening validates the header
    /// against `info`. Idempotent.
    pub fn open(path: &Path, filename: &str, info: &FileInfo) -> Result<Self, StoreError> {
        let count = info.block_count();
        // Pointers are data-region offsets, so the packed region is capped
        // by i32 range.
        if info.file_size > i32::MAX as u64 {
            return Err(StoreError::TooLarge);
        }

        if path.exists() {
            let header_len = TempHeader::encoded_len(count);
            let mut f = File::open(path)?;
            let file_len = f.metadata()?.len();
            if file_len < header_len {
                return Err(StoreError::Malformed);
            }
            let mut raw = vec![0u8; header_len as usize];
            f.read_exact(&mut raw)?;
            let header = parse_temp_header(&raw)?;
            if header.block_count != count {
                return Err(StoreError::Malformed);
            }
            let data_len = file_len - header_len;
            for (id, &ptr) in header.pointers.iter().enumerate() {
                if ptr == ABSENT {
                    continue;
                }
                let len = info.block_len(id as u32).ok_or(StoreError::Malformed)? as u64;
                if ptr < 0 || ptr as u64 + len > data_len {
                    return Err(StoreError::Malformed);
                }
            }
            return Ok(Self {
                filename: filename.to_string(),
                info: *info,
                path: path.to_path_buf(),
                pointers: header.pointers,
                data_len,
            });
        }

        let mut f = File::create(path)?;
        f.write_all(prefix(count).as_bytes())?;
        for _ in 0..count {
            f.write_all(&ABSENT.to_le_bytes())?;
        }
        f.write_all(TABLE_TERMINATOR)?;
        f.sync_data()?;
        Ok(Self {
            filename: filename.to_string(),
            info: *info,
            path: path.to_path_buf(),
            pointers: vec![ABSENT; count as usize],
            data_len: 0,
        })
    }

    /// Filename this container belongs to.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The descriptor this container was opened with.
    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Whether block `block_id` is present.
    pub fn has_block(&self, block_id: u32) -> bool {
        self.pointers
            .get(block_id as usize)
            .is_some_and(|&p| p != ABSENT)
    }

    /// Ids of all absent blocks, ascending.
    pub fn missing_blocks(&self) -> Vec<u32> {
        self.pointers
            .iter()
            .enumerate()
            .filter(|(_, &p)| p == ABSENT)
            .map(|(i, _)| i as u32)
            .collect()
    }

    fn pointer_pos(&self, block_id: u32) -> u64 {
        prefix(self.info.block_count()).len() as u64 + 4 * u64::from(block_id)
    }

    fn data_start(&self) -> u64 {
        TempHeader::encoded_len(self.info.block_count())
    }

    pub(super) fn write_block(&mut self, block_id: u32, bytes: &[u8]) -> Result<(), StoreError> {
        let expected = self
            .info
            .block_len(block_id)
            .ok_or(StoreError::SizeMismatch)?;
        if bytes.len() != expected {
            return Err(StoreError::SizeMismatch);
        }

        if self.has_block(block_id) {
            let existing = self.read_block(block_id)?;
            if existing == bytes {
                return Ok(());
            }
            return Err(StoreError::DuplicateBlock);
        }

        let offset = self.data_len;
        let mut f = OpenOptions::new().write(true).open(&self.path)?;
        f.seek(SeekFrom::Start(self.data_start() + offset))?;
        f.write_all(bytes)?;
        f.seek(SeekFrom::Start(self.pointer_pos(block_id)))?;
        f.write_all(&(offset as i32).to_le_bytes())?;
        f.sync_data()?;

        self.pointers[block_id as usize] = offset as i32;
        self.data_len += bytes.len() as u64;
        Ok(())
    }

    pub(super) fn read_block(&self, block_id: u32) -> Result<Vec<u8>, StoreError> {
        let expected = self
            .info
            .block_len(block_id)
            .ok_or(StoreError::SizeMismatch)?;
        let ptr = self.pointers[block_id as usize];
        if ptr == ABSENT {
            return Err(StoreError::NotFound);
        }
        let mut f = File::open(&self.path)?;
        f.seek(SeekFrom::Start(self.data_start() + ptr as u64))?;
        let mut buf = vec![0u8; expected];
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Clear every pointer and drop the packed data. Used after a digest
    /// mismatch so the next cycle re-acquires the whole file.
    pub(super) fn reset(&mut self) -> Result<(), StoreError> {
        let f = OpenOptions::new().write(true).open(&self.path)?;
        f.set_len(self.data_start())?;
        let mut f = f;
        f.seek(SeekFrom::Start(prefix(self.info.block_count()).len() as u64))?;
        for _ in 0..self.info.block_count() {
            f.write_all(&ABSENT.to_le_bytes())?;
        }
        f.sync_data()?;
        self.pointers.fill(ABSENT);
        self.data_len = 0;
        Ok(())
    }

    pub(super) fn remove_file(&self) -> Result<(), StoreError> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}
