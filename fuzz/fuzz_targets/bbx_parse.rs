//! Fuzz target for `.bbx` annotation document parsing.

#![no_main]

use bboxee::schema::io_bbx::from_bbx_slice;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = from_bbx_slice(data);
});
