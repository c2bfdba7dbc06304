// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Observability: Prometheus metrics and the local metrics listener.

pub mod http;
pub mod metrics;
