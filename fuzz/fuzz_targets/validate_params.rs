#![no_main]

//! Fuzz target for parameter validation from JSON.
//! Any request that validates must be inside the documented limits.

use libfuzzer_sys::fuzz_target;
use pixelperfect::validate::{RawTransformParams, UploadLimits};

fuzz_target!(|data: &[u8]| {
    let Ok(params) = serde_json::from_slice::<RawTransformParams>(data) else {
        return;
    };

    let limits = UploadLimits::default();
    if let Ok(request) = params.validate(&limits) {
        assert!(request.width >= limits.min_dimension && request.width <= limits.max_dimension);
        assert!(request.height >= limits.min_dimension && request.height <= limits.max_dimension);
        assert!((1..=100).contains(&request.quality));
    }
});
