#![no_main]

use libfuzzer_sys::fuzz_target;
use pixelperfect::engine::decode;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let _ = decode(data);
});
