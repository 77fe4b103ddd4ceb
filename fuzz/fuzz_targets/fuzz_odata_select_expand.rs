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
        // Text before the first '|' is $select, the rest is $expand
        let (select, expand) = s.split_once('|').unwrap_or((s, ""));
        common::compile(&QueryOptions::new().with_select(select).with_expand(expand));
    }
});
