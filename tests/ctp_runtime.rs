// Copyright (c) 2026 Cruster
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use cruster::core::types::H256;
use cruster::monitoring::metrics::Metrics;
use cruster::networking::frame::{Frame, MsgType};
use cruster::networking::handler::{Reply, Request, RequestHandler};
use cruster::networking::runtime::{CtpError, CtpRuntime};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

fn id(byte: u8) -> H256 {
    H256::from_bytes([byte; 32])
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn bind_runtime(cluster: H256, peer: H256) -> Arc<CtpRuntime> {
    let metrics = Arc::new(Metrics::new().unwrap());
    CtpRuntime::bind(loopback(), cluster, peer, metrics)
        .await
        .unwrap()
}

#[derive(Default)]
struct CountingHandler {
    status_calls: AtomicU32,
    cleanups: AtomicU32,
}

impl RequestHandler for CountingHandler {
    fn handle_status_request(&self, _req: &Request) -> Reply {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Some((MsgType::StatusResponse, b"1".to_vec()))
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn request_gets_matching_response() {
    let cluster = id(0x41);
    let client = bind_runtime(cluster, id(1)).await;
    let server = bind_runtime(cluster, id(2)).await;
    let handler = Arc::new(CountingHandler::default());
    let listener = server.listen(handler.clone(), 4, 16);
    let server_addr = server.local_addr().unwrap();

    let resp = client
        .send_request(
            MsgType::StatusRequest,
            Vec::new(),
            server_addr,
            Duration::from_secs(1),
            0,
        )
        .await
        .unwrap();

    assert_eq!(resp.msg_type, MsgType::StatusResponse);
    assert_eq!(resp.payload, b"1");
    assert_eq!(resp.sender, id(2));
    assert_eq!(handler.status_calls.load(Ordering::SeqCst), 1);
    assert!(handler.cleanups.load(Ordering::SeqCst) >= 1);
    listener.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn responses_carry_sequence_plus_one_and_node_ids() {
    let cluster = id(0x41);
    let server = bind_runtime(cluster, id(2)).await;
    let listener = server.listen(Arc::new(CountingHandler::default()), 4, 16);
    let server_addr = server.local_addr().unwrap();

    // Raw socket so the request sequence is fully controlled.
    let raw = UdpSocket::bind(loopback()).await.unwrap();
    let req = Frame {
        msg_type: MsgType::StatusRequest,
        seq: 1000,
        cluster,
        sender: id(9),
        payload: Vec::new(),
    };
    raw.send_to(&req.encode().unwrap(), server_addr).await.unwrap();

    let mut buf = [0u8; 1500];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), raw.recv_from(&mut buf))
        .await
        .expect("response before timeout")
        .unwrap();
    let resp = Frame::decode(&buf[..len]).unwrap();
    assert_eq!(resp.seq, 1001);
    assert_eq!(resp.cluster, cluster);
    assert_eq!(resp.sender, id(2));
    assert!(resp.msg_type.is_response());
    listener.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn retransmission_reaches_a_lossy_peer() {
    let cluster = id(0x41);
    let client = bind_runtime(cluster, id(1)).await;

    // A raw peer that drops the first two datagrams and answers the third.
    let server = UdpSocket::bind(loopback()).await.unwrap();
    let server_addr = server.local_addr().unwrap();
    let received = Arc::new(AtomicU32::new(0));
    let seen = received.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        loop {
            let (len, from) = match server.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => return,
            };
            let count = seen.fetch_add(1, Ordering::SeqCst) + 1;
            if count < 3 {
                continue;
            }
            let req = Frame::decode(&buf[..len]).unwrap();
            let resp = Frame {
                msg_type: MsgType::StatusResponse,
                seq: req.seq.wrapping_add(1),
                cluster: req.cluster,
                sender: id(0xEE),
                payload: b"1".to_vec(),
            };
            let _ = server.send_to(&resp.encode().unwrap(), from).await;
        }
    });

    let resp = client
        .send_request(
            MsgType::StatusRequest,
            Vec::new(),
            server_addr,
            Duration::from_millis(300),
            2,
        )
        .await
        .expect("third attempt answered");
    assert_eq!(resp.msg_type, MsgType::StatusResponse);
    assert_eq!(received.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn responsive_peer_sees_no_spurious_retransmits() {
    let cluster = id(0x41);
    let client = bind_runtime(cluster, id(1)).await;
    let server = bind_runtime(cluster, id(2)).await;
    let handler = Arc::new(CountingHandler::default());
    let listener = server.listen(handler.clone(), 4, 16);
    let server_addr = server.local_addr().unwrap();

    client
        .send_request(
            MsgType::StatusRequest,
            Vec::new(),
            server_addr,
            Duration::from_secs(1),
            2,
        )
        .await
        .unwrap();
    // Give a hypothetical duplicate time to land before counting.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handler.status_calls.load(Ordering::SeqCst), 1);
    listener.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_peer_times_out_after_retries() {
    let cluster = id(0x41);
    let client = bind_runtime(cluster, id(1)).await;
    // Bind then drop: nothing listens on the port afterwards.
    let dead_addr = {
        let s = UdpSocket::bind(loopback()).await.unwrap();
        s.local_addr().unwrap()
    };

    let err = client
        .send_request(
            MsgType::StatusRequest,
            Vec::new(),
            dead_addr,
            Duration::from_millis(150),
            1,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CtpError::ConnectionError));
}

#[tokio::test(flavor = "multi_thread")]
async fn response_types_are_rejected_by_send_request() {
    let cluster = id(0x41);
    let client = bind_runtime(cluster, id(1)).await;
    let err = client
        .send_request(
            MsgType::StatusResponse,
            Vec::new(),
            "127.0.0.1:9".parse().unwrap(),
            Duration::from_millis(100),
            0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CtpError::InvalidArgument));
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_cluster_frames_are_dropped_silently() {
    let server = bind_runtime(id(0x41), id(2)).await;
    let handler = Arc::new(CountingHandler::default());
    let listener = server.listen(handler.clone(), 4, 16);
    let server_addr = server.local_addr().unwrap();

    let foreign = bind_runtime(id(0x42), id(1)).await;
    let err = foreign
        .send_request(
            MsgType::StatusRequest,
            Vec::new(),
            server_addr,
            Duration::from_millis(200),
            0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CtpError::ConnectionError));
    assert_eq!(handler.status_calls.load(Ordering::SeqCst), 0);
    listener.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn no_op_gets_no_response() {
    let cluster = id(0x41);
    let client = bind_runtime(cluster, id(1)).await;
    let server = bind_runtime(cluster, id(2)).await;
    let listener = server.listen(Arc::new(CountingHandler::default()), 4, 16);
    let server_addr = server.local_addr().unwrap();

    let err = client
        .send_request(
            MsgType::NoOp,
            b"ping".to_vec(),
            server_addr,
            Duration::from_millis(200),
            0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CtpError::ConnectionError));
    listener.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_types_get_invalid_request() {
    let cluster = id(0x41);
    let client = bind_runtime(cluster, id(1)).await;
    let server = bind_runtime(cluster, id(2)).await;
    let listener = server.listen(Arc::new(CountingHandler::default()), 4, 16);
    let server_addr = server.local_addr().unwrap();

    let resp = client
        .send_request(
            MsgType::Unknown(0x30),
            Vec::new(),
            server_addr,
            Duration::from_secs(1),
            0,
        )
        .await
        .unwrap();
    assert_eq!(resp.msg_type, MsgType::InvalidRequest);
    listener.stop();
}
