//! Fuzz target for protobuf-text label maps.
//!
//! Anything that parses must survive a write/parse cycle.

#![no_main]

use bboxee::schema::LabelMap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(map) = LabelMap::parse(text) {
        let _ = LabelMap::parse(&map.to_pbtxt());
    }
});
