// Copyright (c) 2026 Cruster
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary datagrams must never panic; anything that decodes
    // must re-encode to the identical bytes.
    if let Ok(frame) = cruster::networking::frame::Frame::decode(data) {
        let encoded = frame.encode().expect("decoded frame re-encodes");
        assert_eq!(encoded, data);
    }
});
