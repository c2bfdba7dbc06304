// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use cruster::core::hash::digest_bytes;
use cruster::core::store::manifest::{parse_manifest_bytes, ManifestStore};

fn open() -> (tempfile::TempDir, ManifestStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ManifestStore::open(dir.path().join("manifest")).expect("manifest open");
    (dir, store)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn merge_appends_and_reports_new_entries() {
    let (_dir, store) = open();
    let added = store.merge(&names(&["a.txt", "b.txt"])).unwrap();
    assert_eq!(added, names(&["a.txt", "b.txt"]));

    let added = store.merge(&names(&["b.txt", "c.txt"])).unwrap();
    assert_eq!(added, names(&["c.txt"]));
    assert_eq!(store.entries(), names(&["a.txt", "b.txt", "c.txt"]));
}

#[test]
fn merge_is_idempotent() {
    let (_dir, store) = open();
    store.merge(&names(&["a.txt", "b.txt"])).unwrap();
    let serialized = store.serialize();
    let digest = store.digest();

    let added = store.merge(&names(&["a.txt", "b.txt"])).unwrap();
    assert!(added.is_empty());
    assert_eq!(store.serialize(), serialized);
    assert_eq!(store.digest(), digest);
}

#[test]
fn merge_never_removes() {
    let (_dir, store) = open();
    store.merge(&names(&["a.txt", "b.txt"])).unwrap();
    // A shorter incoming manifest only ever adds.
    let added = store.merge(&names(&["b.txt"])).unwrap();
    assert!(added.is_empty());
    assert_eq!(store.entries(), names(&["a.txt", "b.txt"]));
}

#[test]
fn serialization_is_crlf_separated() {
    let (_dir, store) = open();
    store.merge(&names(&["a.txt", "b.txt", "c.txt"])).unwrap();
    assert_eq!(store.serialize(), b"a.txt\r\nb.txt\r\nc.txt".to_vec());
    assert_eq!(
        parse_manifest_bytes(&store.serialize()),
        names(&["a.txt", "b.txt", "c.txt"])
    );
    assert_eq!(store.digest(), digest_bytes(b"a.txt\r\nb.txt\r\nc.txt"));
}

#[test]
fn entries_persist_across_reopen() {
    let (dir, store) = open();
    store.merge(&names(&["a.txt"])).unwrap();
    drop(store);
    let store = ManifestStore::open(dir.path().join("manifest")).unwrap();
    assert_eq!(store.entries(), names(&["a.txt"]));
    assert!(store.contains("a.txt"));
    assert!(!store.contains("z.txt"));
}

#[test]
fn descriptor_tracks_manifest_content() {
    let (_dir, store) = open();
    store.merge(&names(&["a.txt"])).unwrap();
    let first = store.descriptor().unwrap();
    assert_eq!(first.content_hash, store.digest());
    assert_eq!(first.file_size, store.serialize().len() as u64);

    // Reads are stable while content is unchanged.
    assert_eq!(store.descriptor().unwrap(), first);

    // A merge invalidates the descriptor; the regenerated one matches the
    // new content.
    store.merge(&names(&["b.txt"])).unwrap();
    let second = store.descriptor().unwrap();
    assert_ne!(second.content_hash, first.content_hash);
    assert_eq!(second.content_hash, store.digest());
}

#[test]
fn unsafe_names_are_rejected() {
    let (_dir, store) = open();
    let added = store
        .merge(&names(&["ok.txt", "../escape", "bad\r\nname", "dir/file"]))
        .unwrap();
    assert_eq!(added, names(&["ok.txt"]));
}
