// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

// CTP peer runtime: one UDP socket multiplexed between the client and
// server roles.
//
// Binding starts the demux pump: a background task that decodes inbound
// datagrams, delivers responses to waiting send_request calls (correlation
// key: expected sequence + remote address), and hands requests to the
// attached handler pool. listen() attaches that pool; without it the node
// is client-only and inbound requests are dropped.
//
// Outbound, send_request picks a fresh random sequence number and
// retransmits the same frame on each timeout. Queue overflow on the
// handler pool is answered inline with UNEXPECTED_REQ "busy".

#![forbid(unsafe_code)]

use crate::core::types::{ClusterId, PeerId};
use crate::monitoring::metrics::Metrics;
use crate::networking::frame::{Frame, FrameError, MsgType, MAX_DATAGRAM};
use crate::networking::handler::{dispatch, Request, RequestHandler};
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// CTP runtime errors.
#[derive(Debug, Error)]
pub enum CtpError {
    /// Timeout with retries exhausted, or the socket failed.
    #[error("connection error")]
    ConnectionError,
    /// A response type was passed to `send_request`.
    #[error("invalid argument: not a request type")]
    InvalidArgument,
    /// The correlated frame was not a response type.
    #[error("unexpected response type")]
    UnexpectedResponseType,
    /// Frame codec failure.
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    /// The system RNG failed.
    #[error("rng failure")]
    Rng,
    /// Socket-level failure.
    #[error("socket io: {0}")]
    Io(#[from] io::Error),
}

type WaiterKey = (u32, SocketAddr);
type WorkItem = (Frame, SocketAddr);

/// The CTP peer runtime. One instance per bound socket; simultaneously the
/// client and server side for its cluster.
pub struct CtpRuntime {
    socket: UdpSocket,
    cluster: ClusterId,
    peer_id: PeerId,
    pending: Mutex<HashMap<WaiterKey, oneshot::Sender<Frame>>>,
    handler_sink: Mutex<Option<mpsc::Sender<WorkItem>>>,
    rng: SystemRandom,
    metrics: Arc<Metrics>,
}

/// Handle to an attached handler pool. Stopping detaches the pool and
/// aborts its dispatcher; in-flight handlers run to completion.
pub struct ListenerHandle {
    runtime: Arc<CtpRuntime>,
    dispatcher: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop serving requests. Outbound `send_request` keeps working.
    pub fn stop(&self) {
        *self
            .runtime
            .handler_sink
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
        self.dispatcher.abort();
    }
}

impl CtpRuntime {
    /// Bind the runtime's socket and start the demux pump.
    pub async fn bind(
        addr: SocketAddr,
        cluster: ClusterId,
        peer_id: PeerId,
        metrics: Arc<Metrics>,
    ) -> io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        let runtime = Arc::new(Self {
            socket,
            cluster,
            peer_id,
            pending: Mutex::new(HashMap::new()),
            handler_sink: Mutex::new(None),
            rng: SystemRandom::new(),
            metrics,
        });

        // The pump holds only a weak reference between datagrams, so the
        // runtime (and its socket) is released once every caller is done.
        let weak = Arc::downgrade(&runtime);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM + 1];
            while let Some(rt) = weak.upgrade() {
                rt.pump_once(&mut buf).await;
            }
        });

        if let Ok(addr) = runtime.local_addr() {
            info!(addr = %addr, "ctp socket bound");
        }
        Ok(runtime)
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// This node's peer id.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// This node's cluster id.
    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    /// Receive and route one datagram.
    async fn pump_once(self: &Arc<Self>, buf: &mut [u8]) {
        let (len, from) = match self.socket.recv_from(buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(err = %e, "recv failed");
                return;
            }
        };
        let frame = match Frame::decode(&buf[..len]) {
            Ok(f) => f,
            Err(_) => {
                self.metrics.ctp_invalid_frames_total.inc();
                return;
            }
        };
        if frame.cluster != self.cluster {
            self.metrics.ctp_invalid_frames_total.inc();
            debug!(from = %from, "dropping wrong-cluster frame");
            return;
        }

        // Waiters first: a matching outstanding request claims the frame
        // and the handler path never sees it.
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(frame.seq, from));
        if let Some(tx) = waiter {
            let _ = tx.send(frame);
            return;
        }
        if frame.msg_type.is_response() {
            debug!(from = %from, "dropping uncorrelated response");
            return;
        }

        let sink = self
            .handler_sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(sink) = sink else {
            debug!(from = %from, "no handler attached; dropping request");
            return;
        };
        match sink.try_send((frame, from)) {
            Ok(()) => {}
            Err(TrySendError::Full((frame, from))) => {
                self.metrics.ctp_busy_rejected_total.inc();
                let busy = Frame {
                    msg_type: MsgType::UnexpectedReq,
                    seq: frame.seq.wrapping_add(1),
                    cluster: self.cluster,
                    sender: self.peer_id,
                    payload: b"busy".to_vec(),
                };
                if let Err(e) = self.send_frame(&busy, from).await {
                    debug!(err = %e, "busy reply failed");
                }
            }
            Err(TrySendError::Closed(_)) => {
                // Stale sink from a stopped listener.
                *self
                    .handler_sink
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = None;
            }
        }
    }

    fn remove_waiter(&self, key: &WaiterKey) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Pick a sequence number whose correlation key is free and register a
    /// waiter for it, atomically.
    fn register_waiter(&self, dest: SocketAddr) -> Result<(u32, oneshot::Receiver<Frame>), CtpError> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let mut raw = [0u8; 4];
            self.rng.fill(&mut raw).map_err(|_| CtpError::Rng)?;
            let seq = u32::from_be_bytes(raw);
            match pending.entry((seq.wrapping_add(1), dest)) {
                Entry::Vacant(slot) => {
                    let (tx, rx) = oneshot::channel();
                    slot.insert(tx);
                    return Ok((seq, rx));
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    async fn send_frame(&self, frame: &Frame, dest: SocketAddr) -> Result<(), CtpError> {
        let bytes = frame.encode()?;
        self.socket.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Send a request and await its response.
    ///
    /// Blocks the caller until a frame with sequence `seq + 1` arrives from
    /// `dest`, retransmitting on each timeout up to `retries` additional
    /// times. Fails with [`CtpError::ConnectionError`] after `retries + 1`
    /// silent attempts.
    pub async fn send_request(
        &self,
        msg_type: MsgType,
        payload: Vec<u8>,
        dest: SocketAddr,
        timeout: Duration,
        retries: u32,
    ) -> Result<Frame, CtpError> {
        if !msg_type.is_request() {
            return Err(CtpError::InvalidArgument);
        }

        let (seq, mut rx) = self.register_waiter(dest)?;
        let key = (seq.wrapping_add(1), dest);
        let frame = Frame {
            msg_type,
            seq,
            cluster: self.cluster,
            sender: self.peer_id,
            payload,
        };
        let bytes = match frame.encode() {
            Ok(b) => b,
            Err(e) => {
                self.remove_waiter(&key);
                return Err(e.into());
            }
        };

        self.metrics.ctp_requests_total.inc();
        for attempt in 0..=retries {
            if attempt > 0 {
                self.metrics.ctp_retransmits_total.inc();
            }
            if let Err(e) = self.socket.send_to(&bytes, dest).await {
                self.remove_waiter(&key);
                return Err(e.into());
            }
            match tokio::time::timeout(timeout, &mut rx).await {
                Ok(Ok(resp)) => {
                    if !resp.msg_type.is_response() {
                        return Err(CtpError::UnexpectedResponseType);
                    }
                    return Ok(resp);
                }
                Ok(Err(_)) => {
                    // Waiter dropped without delivery; treat as a dead peer.
                    self.remove_waiter(&key);
                    return Err(CtpError::ConnectionError);
                }
                Err(_) => continue,
            }
        }

        self.remove_waiter(&key);
        self.metrics.ctp_timeouts_total.inc();
        debug!(dest = %dest, ?msg_type, "request timed out");
        Err(CtpError::ConnectionError)
    }

    /// Attach a request handler behind a bounded worker pool: at most
    /// `workers` requests in flight, `queue_depth` more waiting. Returns a
    /// handle that detaches the pool on `stop()`.
    pub fn listen(
        self: &Arc<Self>,
        handler: Arc<dyn RequestHandler>,
        workers: usize,
        queue_depth: usize,
    ) -> ListenerHandle {
        let (work_tx, mut work_rx) = mpsc::channel::<WorkItem>(queue_depth.max(1));
        *self
            .handler_sink
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(work_tx);

        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let rt = Arc::clone(self);
        let dispatcher = tokio::spawn(async move {
            while let Some((frame, from)) = work_rx.recv().await {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let rt = Arc::clone(&rt);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let _permit = permit;
                    rt.handle_request(handler, frame, from).await;
                });
            }
        });

        info!("ctp handler attached");
        ListenerHandle {
            runtime: Arc::clone(self),
            dispatcher,
        }
    }

    async fn handle_request(
        self: Arc<Self>,
        handler: Arc<dyn RequestHandler>,
        frame: Frame,
        from: SocketAddr,
    ) {
        let req = Request {
            msg_type: frame.msg_type,
            seq: frame.seq,
            sender: frame.sender,
            payload: frame.payload,
            from,
        };
        let seq = req.seq;
        let no_response = matches!(req.msg_type, MsgType::NoOp);

        // Handlers touch the disk; keep them off the pump's reactor.
        let worker = Arc::clone(&handler);
        let reply = match tokio::task::spawn_blocking(move || {
            let reply = dispatch(worker.as_ref(), &req);
            worker.cleanup();
            reply
        })
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(err = %e, "handler panicked");
                Some((MsgType::ServerError, b"internal error".to_vec()))
            }
        };

        if no_response {
            return;
        }
        if let Some((msg_type, payload)) = reply {
            let resp = Frame {
                msg_type,
                seq: seq.wrapping_add(1),
                cluster: self.cluster,
                sender: self.peer_id,
                payload,
            };
            if let Err(e) = self.send_frame(&resp, from).await {
                warn!(dest = %from, err = %e, "response send failed");
            }
        }
    }
}
