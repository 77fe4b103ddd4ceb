#![no_main]

mod common;

use libfuzzer_sys::fuzz_target;
use odata_core::QueryOptions;

fuzz_target!(|data: &[u8]| {
    // Limit input size to avoid OOM on pathological inputs
    if data.len() > 1024 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data) {
        common::compile(&QueryOptions::new().with_filter(s));
    }
});
