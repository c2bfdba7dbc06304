#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Cruster node entrypoint.
//! Joins the cluster, starts the CTP listener and the sync loop, and serves
//! a small operator REPL (`SHARE <path>`, `SYNC`, `PEERS`, `EXIT`) on stdin.

use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use cruster::core::store::manifest::ManifestStore;
use cruster::core::store::FileStore;
use cruster::core::sync::SyncEngine;
use cruster::core::types::{H256, DEFAULT_CTP_PORT};
use cruster::monitoring::metrics::Metrics;
use cruster::networking::control::{ControlClient, PeerEntry};
use cruster::networking::handler::NodeHandler;
use cruster::networking::identity::load_or_create_peer_id;
use cruster::networking::peer_table::PeerTable;
use cruster::networking::runtime::CtpRuntime;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    // A TOML config file wins over the env; the env fills the gaps.
    let file_cfg = match std::env::var("CRUSTER_CONFIG") {
        Ok(path) => Some(
            cruster::core::types::load_config(&path)
                .map_err(|e| anyhow!("config {path}: {e}"))?,
        ),
        Err(_) => None,
    };
    let cfg = file_cfg.as_ref();

    let data_dir = cfg
        .map(|c| c.node.data_dir.clone())
        .unwrap_or_else(|| env("CRUSTER_DATA_DIR", "./data"));
    let shared_dir = cfg
        .map(|c| c.node.shared_dir.clone())
        .unwrap_or_else(|| env("CRUSTER_SHARED_DIR", "./shared"));
    let bind_addr: SocketAddr = cfg
        .map(|c| c.ctp.bind_addr.clone())
        .unwrap_or_else(|| env("CRUSTER_BIND", &format!("0.0.0.0:{DEFAULT_CTP_PORT}")))
        .parse()
        .context("bad bind address")?;
    let advertise_addr: SocketAddr = env("CRUSTER_ADVERTISE", &bind_addr.to_string())
        .parse()
        .context("bad CRUSTER_ADVERTISE")?;
    let control_url = cfg
        .map(|c| c.control.base_url.clone())
        .unwrap_or_else(|| env("CRUSTER_CONTROL_URL", "http://127.0.0.1:8000"));
    let cluster_id = cfg
        .map(|c| c.control.cluster_id_hex.clone())
        .or_else(|| std::env::var("CRUSTER_CLUSTER_ID").ok())
        .and_then(|hex| H256::from_hex(&hex))
        .ok_or_else(|| anyhow!("cluster id must be a 32-byte hex id"))?;
    let control_timeout_ms = cfg.map(|c| c.control.timeout_ms).unwrap_or(5_000);
    let metrics_addr = cfg
        .map(|c| c.http.listen_addr.clone())
        .unwrap_or_else(|| env("CRUSTER_METRICS_ADDR", ""));
    let (workers, queue_depth) = cfg
        .map(|c| (c.ctp.workers, c.ctp.queue_depth))
        .unwrap_or((16, 64));
    let settings = cfg.map(|c| c.sync.clone()).unwrap_or_default();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        shared_dir = %shared_dir,
        "cruster node starting"
    );

    let metrics = Arc::new(Metrics::new().map_err(|e| anyhow!("metrics init: {e}"))?);
    let store = Arc::new(FileStore::open(&shared_dir).context("open shared dir")?);
    let manifest =
        Arc::new(ManifestStore::open(store.manifest_dir()).context("open manifest store")?);
    let peers = Arc::new(PeerTable::new(settings.fail_threshold));

    let partials = store.salvageable();
    if !partials.is_empty() {
        info!(?partials, "resuming partial downloads");
    }

    let peer_id =
        load_or_create_peer_id(&data_dir).map_err(|e| anyhow!("peer identity: {e:?}"))?;
    info!(peer = %peer_id, cluster = %cluster_id, "identity loaded");

    let control = ControlClient::new(
        &control_url,
        &cluster_id,
        std::time::Duration::from_millis(control_timeout_ms),
    )
    .map_err(|e| anyhow!("control client: {e}"))?;

    let runtime = CtpRuntime::bind(bind_addr, cluster_id, peer_id, Arc::clone(&metrics))
        .await
        .context("bind ctp socket")?;

    let (nudge_tx, nudge_rx) = mpsc::channel::<()>(1);
    let handler = Arc::new(NodeHandler::new(
        Arc::clone(&store),
        Arc::clone(&manifest),
        Arc::clone(&peers),
        Arc::clone(&metrics),
        nudge_tx.clone(),
    ));
    let handler_dyn: Arc<dyn cruster::networking::handler::RequestHandler> = handler.clone();
    let listener = runtime.listen(handler_dyn, workers, queue_depth);

    // Register with the control server; a failure here is not fatal, the
    // poll loop keeps retrying.
    let me = PeerEntry::from_parts(&peer_id, &advertise_addr);
    if let Err(e) = control.join(&me).await {
        warn!(err = %e, "cluster join failed; will retry via poll loop");
    }

    let engine = SyncEngine::new(
        Arc::clone(&store),
        Arc::clone(&manifest),
        Arc::clone(&peers),
        Arc::clone(&runtime),
        control,
        Arc::clone(&metrics),
        &settings,
    );
    if let Err(e) = engine.refresh_peers().await {
        warn!(err = %e, "initial peer refresh failed");
    }
    let _ = nudge_tx.try_send(());

    let sync_task = tokio::spawn(Arc::clone(&engine).run(nudge_rx));

    if !metrics_addr.is_empty() {
        let addr: SocketAddr = metrics_addr.parse().context("bad CRUSTER_METRICS_ADDR")?;
        let _ = cruster::monitoring::http::serve(Arc::clone(&metrics), addr).await?;
    }

    // Operator REPL on stdin, read on a plain thread so the runtime never
    // blocks on the terminal.
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if cmd_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut repl_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt; shutting down");
                break;
            }
            cmd = cmd_rx.recv(), if repl_open => match cmd {
                Some(line) => {
                    if run_command(&engine, &peers, &line).await {
                        break;
                    }
                }
                None => repl_open = false,
            },
        }
    }

    handler.set_draining(true);
    listener.stop();
    sync_task.abort();
    Ok(())
}

/// Execute one REPL line; returns true on EXIT.
async fn run_command(engine: &SyncEngine, peers: &PeerTable, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return false;
    };
    match cmd.to_ascii_uppercase().as_str() {
        "SHARE" => {
            let Some(path) = parts.next() else {
                println!("usage: SHARE <path>");
                return false;
            };
            match engine.share(&PathBuf::from(path)).await {
                Ok(info) => println!("shared ({} bytes, {})", info.file_size, info.content_hash),
                Err(e) => println!("share failed: {e}"),
            }
        }
        "SYNC" => match engine.update().await {
            Ok(report) => println!(
                "sync done: {} fetched, {} pending",
                report.fetched.len(),
                report.pending.len()
            ),
            Err(e) => println!("sync failed: {e}"),
        },
        "PEERS" => {
            for rec in peers.snapshot() {
                println!("{} {} {:?}", rec.peer_id, rec.addr, rec.state);
            }
        }
        "EXIT" | "QUIT" => return true,
        other => println!("unknown command: {other}"),
    }
    false
}
