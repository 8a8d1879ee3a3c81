// src/engine/common.rs
//
// Common utilities shared across engine modules.
// Provides the engine Result alias and the codec panic boundary.

use crate::error::PixelPerfectError;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub type EngineResult<T> = std::result::Result<T, PixelPerfectError>;

/// Run a codec call, converting any panic into `InternalPanic`.
///
/// mozjpeg reports libjpeg errors by unwinding, and the other C-backed codecs
/// can assert on malformed input. Buffers owned by the closure are dropped
/// during unwinding, so nothing leaks past this boundary.
pub fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(PixelPerfectError::internal_panic(format!(
            "{stage}: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
