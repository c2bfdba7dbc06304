// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: CTP frame codec and peer runtime, peer table, persistent
//! identity, and the control-server client.

pub mod control;
pub mod frame;
pub mod handler;
pub mod identity;
pub mod peer_table;
pub mod runtime;
