// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Local observability listener: `/metrics` (Prometheus text format) and
//! `/healthz`.

use crate::monitoring::metrics::Metrics;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metrics.registry.gather(), &mut buf) {
        warn!(err = %e, "metrics encode failed");
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Serve the observability endpoints on `addr` in a background task.
pub async fn serve(metrics: Arc<Metrics>, addr: SocketAddr) -> std::io::Result<JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "metrics listener started");
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(err = %e, "metrics listener stopped");
        }
    }))
}
