// Copyright (c) 2026 Cruster
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Container header parsing must never panic on hostile input.
    if let Ok(header) = cruster::core::store::parse_temp_header(data) {
        assert_eq!(header.pointers.len(), header.block_count as usize);
    }
});
