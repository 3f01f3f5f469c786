//! Fuzz target for TFRecord framing and `tf.train.Example` decoding.

#![no_main]

use bboxee::export::fuzz_parse_records;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_parse_records(data);
});
