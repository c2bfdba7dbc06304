// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::core::types::PeerId;
use ring::rand::{SecureRandom, SystemRandom};

#[derive(Debug)]
pub enum IdentityError {
    Io,
    Decode,
    Rng,
}

impl From<io::Error> for IdentityError {
    fn from(_: io::Error) -> Self {
        IdentityError::Io
    }
}

/// Load this peer's 32-byte id from `data_dir/peer_id`, or draw a fresh one
/// from the system RNG and persist it. The id never changes over the peer's
/// lifetime.
pub fn load_or_create_peer_id(data_dir: impl AsRef<Path>) -> Result<PeerId, IdentityError> {
    let dir = data_dir.as_ref();
    fs::create_dir_all(dir)?;

    let path: PathBuf = dir.join("peer_id");

    if path.exists() {
        let raw = fs::read_to_string(&path)?;
        return PeerId::from_hex(raw.trim()).ok_or(IdentityError::Decode);
    }

    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).map_err(|_| IdentityError::Rng)?;
    let peer_id = PeerId::from_bytes(bytes);

    // Atomic-ish write: write to tmp then rename.
    let tmp = dir.join("peer_id.tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(peer_id.to_hex().as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, &path)?;

    Ok(peer_id)
}
