// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use cruster::core::hash::{digest_bytes, digest_file};
use cruster::core::store::{FileInfo, FileStore, StoreError};
use cruster::core::types::{BLOCK_SIZE, H256};

fn store() -> (tempfile::TempDir, FileStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::open(dir.path()).expect("store open");
    (dir, store)
}

fn sample_file(len: usize) -> (Vec<u8>, FileInfo) {
    let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let info = FileInfo::new(len as u64, 1_700_000_000, digest_bytes(&bytes));
    (bytes, info)
}

fn blocks(bytes: &[u8]) -> Vec<&[u8]> {
    bytes.chunks(BLOCK_SIZE).collect()
}

#[test]
fn crinfo_round_trips() {
    let (_, info) = sample_file(3000);
    let parsed = FileInfo::parse(&info.to_bytes()).unwrap();
    assert_eq!(parsed, info);
    assert_eq!(parsed.block_count(), 3);
    assert_eq!(parsed.block_len(0), Some(BLOCK_SIZE));
    assert_eq!(parsed.block_len(2), Some(3000 - 2 * BLOCK_SIZE));
    assert_eq!(parsed.block_len(3), None);
}

#[test]
fn crinfo_rejects_garbage() {
    assert!(matches!(
        FileInfo::parse(b"CRTEMP 3\r\nabc"),
        Err(StoreError::Malformed)
    ));
    assert!(matches!(
        FileInfo::parse(b"CRINFO 12 nope\r\nabc"),
        Err(StoreError::Malformed)
    ));
    assert!(matches!(
        FileInfo::parse(b"CRINFO 12 5\r\nnot-hex"),
        Err(StoreError::Malformed)
    ));
}

#[test]
fn put_info_is_idempotent_but_guards_the_name() {
    let (_dir, store) = store();
    let (_, info) = sample_file(100);
    store.put_info("a.txt", &info).unwrap();
    store.put_info("a.txt", &info).unwrap();

    let other = FileInfo::new(100, 1_700_000_000, H256::from_bytes([9u8; 32]));
    assert!(matches!(
        store.put_info("a.txt", &other),
        Err(StoreError::AlreadyExists)
    ));
    assert_eq!(store.get_info("a.txt").unwrap(), info);
    assert!(matches!(store.get_info("b.txt"), Err(StoreError::NotFound)));
}

#[test]
fn written_blocks_read_back_bit_identical() {
    let (_dir, store) = store();
    let (bytes, info) = sample_file(3000);
    store.put_info("f.bin", &info).unwrap();
    let mut handle = store.open_temp("f.bin", &info).unwrap();
    assert_eq!(handle.missing_blocks(), vec![0, 1, 2]);

    // Out of order on purpose: the pointer table absorbs arrival order.
    let parts = blocks(&bytes);
    store.write_block(&mut handle, 2, parts[2]).unwrap();
    store.write_block(&mut handle, 0, parts[0]).unwrap();
    assert!(handle.has_block(0));
    assert!(!handle.has_block(1));
    assert_eq!(handle.missing_blocks(), vec![1]);

    assert_eq!(store.read_block("f.bin", 0).unwrap(), parts[0]);
    assert_eq!(store.read_block("f.bin", 2).unwrap(), parts[2]);
    assert!(matches!(
        store.read_block("f.bin", 1),
        Err(StoreError::NotFound)
    ));
}

#[test]
fn duplicate_and_mismatched_blocks_are_rejected() {
    let (_dir, store) = store();
    let (bytes, info) = sample_file(2500);
    store.put_info("f.bin", &info).unwrap();
    let mut handle = store.open_temp("f.bin", &info).unwrap();
    let parts = blocks(&bytes);

    store.write_block(&mut handle, 0, parts[0]).unwrap();
    // Identical re-write is a no-op.
    store.write_block(&mut handle, 0, parts[0]).unwrap();
    // Different bytes in a taken slot are refused.
    let mut corrupt = parts[0].to_vec();
    corrupt[0] ^= 0xFF;
    assert!(matches!(
        store.write_block(&mut handle, 0, &corrupt),
        Err(StoreError::DuplicateBlock)
    ));

    // Wrong length for the block id.
    assert!(matches!(
        store.write_block(&mut handle, 1, &parts[0][..10]),
        Err(StoreError::SizeMismatch)
    ));
    // Out-of-range id.
    assert!(matches!(
        store.write_block(&mut handle, 9, parts[0]),
        Err(StoreError::SizeMismatch)
    ));
}

#[test]
fn finalize_produces_the_descriptor_digest() {
    let (dir, store) = store();
    let (bytes, info) = sample_file(3000);
    store.put_info("f.bin", &info).unwrap();
    let mut handle = store.open_temp("f.bin", &info).unwrap();
    for (i, part) in blocks(&bytes).into_iter().enumerate() {
        store.write_block(&mut handle, i as u32, part).unwrap();
    }
    store.finalize(&mut handle).unwrap();

    assert!(store.has_final("f.bin"));
    assert!(store.salvageable().is_empty());
    let written = dir.path().join("f.bin");
    assert_eq!(digest_file(&written).unwrap(), info.content_hash);
    assert_eq!(std::fs::read(&written).unwrap(), bytes);

    // Finalized files serve blocks directly.
    assert_eq!(store.read_block("f.bin", 1).unwrap(), blocks(&bytes)[1]);
}

#[test]
fn finalize_rejects_incomplete_downloads() {
    let (_dir, store) = store();
    let (bytes, info) = sample_file(3000);
    store.put_info("f.bin", &info).unwrap();
    let mut handle = store.open_temp("f.bin", &info).unwrap();
    store.write_block(&mut handle, 0, blocks(&bytes)[0]).unwrap();
    assert!(matches!(
        store.finalize(&mut handle),
        Err(StoreError::Incomplete)
    ));
}

#[test]
fn hash_mismatch_clears_every_pointer_for_redownload() {
    let (_dir, store) = store();
    let (bytes, mut info) = sample_file(3000);
    // Descriptor lies about the digest, as if a block got corrupted.
    info.content_hash = H256::from_bytes([7u8; 32]);
    store.put_info("f.bin", &info).unwrap();
    let mut handle = store.open_temp("f.bin", &info).unwrap();
    for (i, part) in blocks(&bytes).into_iter().enumerate() {
        store.write_block(&mut handle, i as u32, part).unwrap();
    }

    assert!(matches!(
        store.finalize(&mut handle),
        Err(StoreError::HashMismatch)
    ));
    assert!(!store.has_final("f.bin"));
    assert_eq!(handle.missing_blocks(), vec![0, 1, 2]);

    // The container survives a reopen with its pointers still cleared, and
    // a full re-download then finalizes.
    drop(handle);
    let mut handle = store.open_temp("f.bin", &info).unwrap();
    assert_eq!(handle.missing_blocks(), vec![0, 1, 2]);
    let fixed = FileInfo::new(info.file_size, info.created_at, digest_bytes(&bytes));
    // Simulate the re-download against a corrected descriptor.
    let (_dir2, store2) = store_with_info("f.bin", &fixed);
    let mut handle2 = store2.open_temp("f.bin", &fixed).unwrap();
    for (i, part) in blocks(&bytes).into_iter().enumerate() {
        store2.write_block(&mut handle2, i as u32, part).unwrap();
    }
    store2.finalize(&mut handle2).unwrap();
    assert!(store2.has_final("f.bin"));
}

fn store_with_info(name: &str, info: &FileInfo) -> (tempfile::TempDir, FileStore) {
    let (dir, store) = store();
    store.put_info(name, info).unwrap();
    (dir, store)
}

#[test]
fn partial_downloads_survive_reopen() {
    let (dir, store) = store();
    let (bytes, info) = sample_file(5000);
    store.put_info("big.bin", &info).unwrap();
    let mut handle = store.open_temp("big.bin", &info).unwrap();
    let parts = blocks(&bytes);
    store.write_block(&mut handle, 1, parts[1]).unwrap();
    store.write_block(&mut handle, 3, parts[3]).unwrap();
    drop(handle);
    drop(store);

    // Fresh process: salvage finds the partial, pointers intact.
    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.salvageable(), vec!["big.bin".to_string()]);
    let handle = store.open_temp("big.bin", &info).unwrap();
    assert_eq!(handle.missing_blocks(), vec![0, 2, 4]);
    assert_eq!(store.read_block("big.bin", 3).unwrap(), parts[3]);
}

#[test]
fn ingest_places_descriptor_and_final_copy() {
    let (_src_dir, src) = {
        let d = tempfile::tempdir().unwrap();
        let p = d.path().join("hello.txt");
        std::fs::write(&p, b"hello cluster").unwrap();
        (d, p)
    };
    let (_dir, store) = store();
    let info = store.ingest(&src, "hello.txt").unwrap();
    assert_eq!(info.file_size, 13);
    assert!(store.has_final("hello.txt"));
    assert_eq!(
        store.lookup_by_hash(&info.content_hash),
        Some("hello.txt".to_string())
    );
    assert_eq!(store.read_block("hello.txt", 0).unwrap(), b"hello cluster");

    // Re-ingesting identical content is a no-op; different content under
    // the same name is refused.
    store.ingest(&src, "hello.txt").unwrap();
    std::fs::write(&src, b"different bytes").unwrap();
    assert!(matches!(
        store.ingest(&src, "hello.txt"),
        Err(StoreError::AlreadyExists)
    ));
}

#[test]
fn zero_length_files_finalize_immediately() {
    let (_dir, store) = store();
    let info = FileInfo::new(0, 1_700_000_000, digest_bytes(b""));
    store.put_info("empty.bin", &info).unwrap();
    let mut handle = store.open_temp("empty.bin", &info).unwrap();
    assert!(handle.missing_blocks().is_empty());
    store.finalize(&mut handle).unwrap();
    assert!(store.has_final("empty.bin"));
    assert_eq!(std::fs::read(store.root().join("empty.bin")).unwrap(), b"");
}
