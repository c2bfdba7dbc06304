// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Content digests. SHA-256 everywhere; the protocol only requires a
//! fixed-width collision-resistant digest, carried as opaque bytes.

use crate::core::types::H256;
use ring::digest::{Context, SHA256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Digest of an in-memory byte string.
pub fn digest_bytes(data: &[u8]) -> H256 {
    let d = ring::digest::digest(&SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    H256::from_bytes(out)
}

/// Streaming digest of a file on disk.
pub fn digest_file(path: &Path) -> io::Result<H256> {
    let mut f = File::open(path)?;
    let mut ctx = Context::new(&SHA256);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n]);
    }
    let d = ctx.finish();
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    Ok(H256::from_bytes(out))
}

/// Incremental digest over block-sized chunks, used when reassembling a
/// download for finalization.
pub struct Digester {
    ctx: Context,
}

impl Digester {
    /// Start a fresh digest.
    pub fn new() -> Self {
        Self {
            ctx: Context::new(&SHA256),
        }
    }

    /// Feed the next chunk.
    pub fn update(&mut self, data: &[u8]) {
        self.ctx.update(data);
    }

    /// Finish and return the digest.
    pub fn finish(self) -> H256 {
        let d = self.ctx.finish();
        let mut out = [0u8; 32];
        out.copy_from_slice(d.as_ref());
        H256::from_bytes(out)
    }
}

impl Default for Digester {
    fn default() -> Self {
        Self::new()
    }
}
