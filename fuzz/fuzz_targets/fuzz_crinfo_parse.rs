// Copyright (c) 2026 Cruster
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Descriptor parsing must never panic on hostile input.
    let _ = cruster::core::store::FileInfo::parse(data);
});
