// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Cluster synchronization.

pub mod engine;

pub use engine::{SyncEngine, SyncError, UpdateReport};
