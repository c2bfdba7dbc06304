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

//! The on-disk block store.
//!
//! The peer process exclusively owns the shared directory tree:
//!
//! ```text
//! /                        finalized shared files
//! /crinfo/{name}.crinfo    descriptor per shared file
//! /crtemp/{name}.crtemp    in-progress downloads
//! /manifest/.crmanifest    serialized manifest
//! /manifest/crinfo/.crmanifest.crinfo
//! ```
//!
//! Mutating operations hold a per-file exclusive lock for the duration of
//! the call; reads take the shared side. A file is never read while being
//! finalized.

pub mod info;
pub mod manifest;
pub mod temp;

pub use info::FileInfo;
pub use temp::{parse_temp_header, TempHandle, TempHeader};

use crate::core::hash::{digest_file, Digester};
use crate::core::types::{H256, BLOCK_SIZE};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No such file, block, or descriptor.
    #[error("not found")]
    NotFound,
    /// Descriptor present under the same name with a different digest.
    #[error("already exists")]
    AlreadyExists,
    /// Block slot already holds different bytes.
    #[error("duplicate block")]
    DuplicateBlock,
    /// Block length wrong for its id, or the id is out of range.
    #[error("size mismatch")]
    SizeMismatch,
    /// Reassembled bytes do not match the descriptor digest.
    #[error("hash mismatch")]
    HashMismatch,
    /// Finalization attempted with blocks still missing.
    #[error("incomplete download")]
    Incomplete,
    /// On-disk container or descriptor failed to parse.
    #[error("malformed container")]
    Malformed,
    /// File exceeds what the container format can index.
    #[error("too large for container format")]
    TooLarge,
    /// Underlying filesystem failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

const INFO_DIR: &str = "crinfo";
const TEMP_DIR: &str = "crtemp";
const MANIFEST_DIR: &str = "manifest";
const INFO_EXT: &str = "crinfo";
const TEMP_EXT: &str = "crtemp";

/// Owner of the shared directory: finalized files, descriptors, partial
/// downloads, and the digest → filename index used to serve block requests.
pub struct FileStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    index: Mutex<HashMap<H256, String>>,
}

impl FileStore {
    /// Open the store rooted at `root`, creating the directory layout if
    /// absent and rebuilding the digest index from existing descriptors.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(INFO_DIR))?;
        fs::create_dir_all(root.join(TEMP_DIR))?;
        fs::create_dir_all(root.join(MANIFEST_DIR).join(INFO_DIR))?;

        let mut index = HashMap::new();
        for entry in fs::read_dir(root.join(INFO_DIR))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(INFO_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match fs::read(&path).map_err(StoreError::from).and_then(|b| FileInfo::parse(&b)) {
                Ok(info) => {
                    index.insert(info.content_hash, name.to_string());
                }
                Err(e) => warn!(file = %path.display(), err = %e, "skipping unreadable descriptor"),
            }
        }

        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
            index: Mutex::new(index),
        })
    }

    /// Root of the shared directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the manifest and its descriptor.
    pub fn manifest_dir(&self) -> PathBuf {
        self.root.join(MANIFEST_DIR)
    }

    fn final_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn info_path(&self, name: &str) -> PathBuf {
        self.root.join(INFO_DIR).join(format!("{name}.{INFO_EXT}"))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.root.join(TEMP_DIR).join(format!("{name}.{TEMP_EXT}"))
    }

    fn file_lock(&self, name: &str) -> Arc<RwLock<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(name.to_string()).or_default().clone()
    }

    /// Whether a finalized copy of `name` is present.
    pub fn has_final(&self, name: &str) -> bool {
        self.final_path(name).is_file()
    }

    /// Filename currently associated with a content digest, if any.
    pub fn lookup_by_hash(&self, hash: &H256) -> Option<String> {
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(hash)
            .cloned()
    }

    /// Write a descriptor atomically. A no-op when an identical descriptor
    /// is already present; fails with [`StoreError::AlreadyExists`] when the
    /// name is taken by a different digest.
    pub fn put_info(&self, name: &str, info: &FileInfo) -> Result<(), StoreError> {
        let lock = self.file_lock(name);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());

        let path = self.info_path(name);
        if path.exists() {
            let existing = FileInfo::parse(&fs::read(&path)?)?;
            if existing.content_hash == info.content_hash {
                return Ok(());
            }
            return Err(StoreError::AlreadyExists);
        }

        write_atomic(&path, &info.to_bytes())?;
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(info.content_hash, name.to_string());
        Ok(())
    }

    /// Read the descriptor for `name`.
    pub fn get_info(&self, name: &str) -> Result<FileInfo, StoreError> {
        let lock = self.file_lock(name);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        let path = self.info_path(name);
        if !path.exists() {
            return Err(StoreError::NotFound);
        }
        FileInfo::parse(&fs::read(&path)?)
    }

    /// Create or reopen the partial-download container for `name`.
    pub fn open_temp(&self, name: &str, info: &FileInfo) -> Result<TempHandle, StoreError> {
        let lock = self.file_lock(name);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        TempHandle::open(&self.temp_path(name), name, info)
    }

    /// Append a block to a partial download. No-op when the identical bytes
    /// are already present; [`StoreError::DuplicateBlock`] when the slot
    /// holds different bytes.
    pub fn write_block(
        &self,
        handle: &mut TempHandle,
        block_id: u32,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let lock = self.file_lock(handle.filename());
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        handle.write_block(block_id, bytes)
    }

    /// Reassemble a complete download, verify its digest, and atomically
    /// promote it to the final path. On digest mismatch the container is
    /// kept with every pointer cleared so the next cycle re-downloads.
    pub fn finalize(&self, handle: &mut TempHandle) -> Result<(), StoreError> {
        let lock = self.file_lock(handle.filename());
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());

        if !handle.missing_blocks().is_empty() {
            return Err(StoreError::Incomplete);
        }

        let name = handle.filename().to_string();
        let staging = self.root.join(format!("{name}.crnew"));
        let mut digester = Digester::new();
        {
            let mut out = File::create(&staging)?;
            for block_id in 0..handle.info().block_count() {
                let bytes = handle.read_block(block_id)?;
                digester.update(&bytes);
                out.write_all(&bytes)?;
            }
            out.sync_all()?;
        }

        if digester.finish() != handle.info().content_hash {
            let _ = fs::remove_file(&staging);
            handle.reset()?;
            return Err(StoreError::HashMismatch);
        }

        fs::rename(&staging, self.final_path(&name))?;
        handle.remove_file()?;
        Ok(())
    }

    /// Serve block bytes from either a finalized file or a partial download
    /// whose pointer is set. [`StoreError::NotFound`] when the block is not
    /// held locally.
    pub fn read_block(&self, name: &str, block_id: u32) -> Result<Vec<u8>, StoreError> {
        let lock = self.file_lock(name);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());

        let final_path = self.final_path(name);
        if final_path.is_file() {
            let info_path = self.info_path(name);
            if !info_path.exists() {
                return Err(StoreError::NotFound);
            }
            let info = FileInfo::parse(&fs::read(&info_path)?)?;
            let expected = info.block_len(block_id).ok_or(StoreError::SizeMismatch)?;
            let mut f = File::open(&final_path)?;
            f.seek(SeekFrom::Start(u64::from(block_id) * BLOCK_SIZE as u64))?;
            let mut buf = vec![0u8; expected];
            f.read_exact(&mut buf)?;
            return Ok(buf);
        }

        let temp_path = self.temp_path(name);
        if temp_path.exists() {
            let info_path = self.info_path(name);
            if !info_path.exists() {
                return Err(StoreError::NotFound);
            }
            let info = FileInfo::parse(&fs::read(&info_path)?)?;
            let handle = TempHandle::open(&temp_path, name, &info)?;
            return handle.read_block(block_id);
        }

        Err(StoreError::NotFound)
    }

    /// Ingest a local file for sharing: digest it, write its descriptor, and
    /// place a finalized copy in the store root. Returns the descriptor.
    pub fn ingest(&self, src: &Path, name: &str) -> Result<FileInfo, StoreError> {
        let meta = fs::metadata(src)?;
        if !meta.is_file() {
            return Err(StoreError::NotFound);
        }
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let info = FileInfo::new(meta.len(), created_at, digest_file(src)?);
        self.put_info(name, &info)?;

        let lock = self.file_lock(name);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        let dest = self.final_path(name);
        if src != dest {
            let staging = self.root.join(format!("{name}.crnew"));
            fs::copy(src, &staging)?;
            fs::rename(&staging, &dest)?;
        }
        Ok(info)
    }

    /// Names of partial downloads left over from a previous run. These are
    /// picked up again by the next update cycle.
    pub fn salvageable(&self) -> Vec<String> {
        let mut out = Vec::new();
        let Ok(entries) = fs::read_dir(self.root.join(TEMP_DIR)) else {
            return out;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    out.push(stem.to_string());
                }
            }
        }
        out.sort();
        out
    }
}

/// Write-temp-then-rename, so readers never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
