//! Fuzz target for label remap JSON.

#![no_main]

use bboxee::schema::LabelRemap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(remap) = LabelRemap::from_json_str(text) {
        let _ = remap.vocabulary(["deer", "exclude", ""]);
    }
});
