#![no_main]

//! Fuzz target for the AVIF decoding path (avif-parse + rav1d).
//! Only inputs that look like ISOBMFF (ftyp box) are exercised.

use libfuzzer_sys::fuzz_target;
use pixelperfect::engine::{check_dimensions, decode};

fuzz_target!(|data: &[u8]| {
    if data.len() < 12 {
        return;
    }
    if &data[4..8] != b"ftyp" {
        return;
    }

    // Keep allocations inside the fuzz memory budget.
    if let Ok(meta) = pixelperfect::inspect_header_from_bytes(data) {
        if check_dimensions(meta.width, meta.height).is_err() {
            return;
        }
    }

    let _ = decode(data);
});
