// Copyright (c) 2026 Cruster
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use arbitrary::Arbitrary;
use cruster::core::types::H256;
use cruster::networking::frame::{Frame, MsgType};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct RawFrame {
    type_code: u8,
    seq: u32,
    cluster: [u8; 32],
    sender: [u8; 32],
    payload: Vec<u8>,
}

fuzz_target!(|raw: RawFrame| {
    let frame = Frame {
        msg_type: MsgType::from_code(raw.type_code),
        seq: raw.seq,
        cluster: H256::from_bytes(raw.cluster),
        sender: H256::from_bytes(raw.sender),
        payload: raw.payload,
    };
    // Encoding either fails cleanly (payload bound) or round-trips.
    if let Ok(bytes) = frame.encode() {
        let decoded = Frame::decode(&bytes).expect("encoded frame decodes");
        assert_eq!(decoded, frame);
    }
});
