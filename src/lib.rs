// lib.rs
//
// pixelperfect: a synchronous image transformation pipeline.
//
// Decoder -> Region Selector -> Transformer -> Encoder
//
// Every call is self-contained: encoded bytes plus a TransformRequest in,
// encoded bytes plus metrics out. No shared mutable state, so calls can run
// on as many threads as the caller likes.

pub mod codecs;
pub mod engine;
pub mod error;
pub mod ops;
pub mod validate;

use error::PixelPerfectError;
use image::ImageReader;
use serde::Serialize;
use std::io::Cursor;

pub use engine::{process_image, TransformResult, TransformTask};
pub use error::{ErrorStage, Result};
pub use ops::{CropRect, OutputFormat, TransformRequest};
pub use validate::{RawTransformParams, UploadLimits};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectMetadata {
    pub width: u32,
    pub height: u32,
    /// Lowercase container name (jpeg, png, webp, gif, avif, ...)
    pub format: Option<String>,
}

/// Read width, height and container format from the header only.
/// Pixels are not decoded, so this is cheap enough to run before accepting an upload.
pub fn inspect_header_from_bytes(data: &[u8]) -> std::result::Result<InspectMetadata, PixelPerfectError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| PixelPerfectError::decode_failed(format!("failed to read image header: {e}")))?;

    let format = reader.format().map(|f| format!("{f:?}").to_lowercase());
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| PixelPerfectError::decode_failed(format!("failed to read dimensions: {e}")))?;

    Ok(InspectMetadata {
        width,
        height,
        format,
    })
}

pub const PROCESSING_METRICS_VERSION: &str = "1.0.0";

/// Timing and size figures for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformMetrics {
    /// Schema version for compatibility negotiation
    pub version: String,
    pub decode_ms: f64,
    /// Region selection plus transformer
    pub transform_ms: f64,
    pub encode_ms: f64,
    /// Total wall-clock duration in milliseconds
    pub total_ms: f64,
    /// Process CPU time (user + system) in seconds consumed during the run.
    ///
    /// **Note**: `getrusage()` reports the whole process, so concurrent runs
    /// inflate each other's figure.
    pub cpu_time: f64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// bytes_out / bytes_in
    pub compression_ratio: f64,
    /// Detected input format (lowercase: jpeg, png, webp, avif, gif)
    pub format_in: Option<String>,
    pub format_out: String,
    /// True when the output carries no EXIF
    pub metadata_stripped: bool,
}

impl Default for TransformMetrics {
    fn default() -> Self {
        Self {
            version: PROCESSING_METRICS_VERSION.to_string(),
            decode_ms: 0.0,
            transform_ms: 0.0,
            encode_ms: 0.0,
            total_ms: 0.0,
            cpu_time: 0.0,
            bytes_in: 0,
            bytes_out: 0,
            compression_ratio: 0.0,
            format_in: None,
            format_out: String::new(),
            metadata_stripped: true,
        }
    }
}

impl TransformMetrics {
    /// Wall-clock time in seconds with two decimals, e.g. `"0.42s"`.
    pub fn processing_time_display(&self) -> String {
        format!("{:.2}s", self.total_ms / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};

    #[test]
    fn inspect_reads_header() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(123, 45));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        let meta = inspect_header_from_bytes(&buf).unwrap();
        assert_eq!(
            meta,
            InspectMetadata {
                width: 123,
                height: 45,
                format: Some("png".to_string())
            }
        );
    }

    #[test]
    fn inspect_rejects_garbage() {
        let err = inspect_header_from_bytes(b"nope").unwrap_err();
        assert_eq!(err.stage(), ErrorStage::Decode);
    }

    #[test]
    fn processing_time_display_has_two_decimals() {
        let metrics = TransformMetrics {
            total_ms: 421.7,
            ..TransformMetrics::default()
        };
        assert_eq!(metrics.processing_time_display(), "0.42s");
    }

    #[test]
    fn metrics_serialize_to_json() {
        let json = serde_json::to_value(TransformMetrics::default()).unwrap();
        assert_eq!(json["version"], PROCESSING_METRICS_VERSION);
        assert_eq!(json["metadata_stripped"], true);
    }
}
