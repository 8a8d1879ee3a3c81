// src/validate.rs
//
// Request validation: upload limits and raw parameter resolution.
// Everything the pipeline receives has passed through here, with defaults filled in.

use crate::engine::detect_format;
use crate::error::{PixelPerfectError, Result};
use crate::ops::{CropRect, OutputFormat, TransformRequest};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;
const STRICT_MAX_BYTES: u64 = 16 * 1024 * 1024;
const MIN_DIMENSION: u32 = 1;
const MAX_TARGET_DIMENSION: u32 = 10_000;
const STRICT_MAX_TARGET_DIMENSION: u32 = 4_096;

pub const ALLOWED_CONTENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/avif",
    "image/gif",
];

/// Limits applied to an upload before any decoding happens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_bytes: u64,
    pub min_dimension: u32,
    pub max_dimension: u32,
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            min_dimension: MIN_DIMENSION,
            max_dimension: MAX_TARGET_DIMENSION,
            allowed_content_types: ALLOWED_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl UploadLimits {
    /// Tighter caps for untrusted batch jobs: 16 MiB, 4096 px targets, no GIF.
    pub fn strict() -> Self {
        Self {
            max_bytes: STRICT_MAX_BYTES,
            max_dimension: STRICT_MAX_TARGET_DIMENSION,
            allowed_content_types: ALLOWED_CONTENT_TYPES
                .iter()
                .filter(|ct| **ct != "image/gif")
                .map(|s| s.to_string())
                .collect(),
            ..Self::default()
        }
    }

    pub fn enforce_source_len(&self, len: usize) -> Result<()> {
        let len = len as u64;
        if len > self.max_bytes {
            warn!(size = len, max = self.max_bytes, "File size exceeded");
            return Err(PixelPerfectError::file_too_large(len, self.max_bytes));
        }
        Ok(())
    }

    pub fn enforce_content_type(&self, content_type: &str) -> Result<()> {
        let normalized = content_type.trim().to_ascii_lowercase();
        if self.allowed_content_types.iter().any(|ct| *ct == normalized) {
            Ok(())
        } else {
            warn!(content_type, "Invalid file type");
            Err(PixelPerfectError::unsupported_content_type(
                content_type.to_string(),
            ))
        }
    }

    fn enforce_dimension(&self, name: &'static str, value: i64) -> Result<u32> {
        if value < self.min_dimension as i64 || value > self.max_dimension as i64 {
            return Err(invalid(
                name,
                value,
                format!(
                    "must be between {} and {}",
                    self.min_dimension, self.max_dimension
                ),
            ));
        }
        Ok(value as u32)
    }
}

/// Content type sniffed from the container's magic bytes.
pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    detect_format(bytes).map(|format| format.to_mime_type())
}

fn invalid(name: &'static str, value: impl ToString, reason: impl Into<String>) -> PixelPerfectError {
    let err = PixelPerfectError::invalid_argument(name, value.to_string(), reason.into());
    warn!(error = %err, "Validation failed");
    err
}

fn default_format() -> String {
    OutputFormat::Jpeg.as_str().to_string()
}

fn default_quality() -> i64 {
    80
}

fn default_true() -> bool {
    true
}

/// Parameters as received from a caller (form fields, JSON, CLI flags).
///
/// Integers are signed so that negative input is rejected here rather than
/// failing to parse.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RawTransformParams {
    pub width: Option<i64>,
    pub height: Option<i64>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_quality")]
    pub quality: i64,
    #[serde(default = "default_true")]
    pub strip_metadata: bool,
    #[serde(default)]
    pub smart_sharpen: bool,
    #[serde(default)]
    pub center_crop: bool,
    #[serde(default)]
    pub crop_x: i64,
    #[serde(default)]
    pub crop_y: i64,
    #[serde(default)]
    pub crop_width: Option<i64>,
    #[serde(default)]
    pub crop_height: Option<i64>,
}

impl RawTransformParams {
    pub fn new(width: i64, height: i64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            format: default_format(),
            quality: default_quality(),
            strip_metadata: true,
            smart_sharpen: false,
            center_crop: false,
            crop_x: 0,
            crop_y: 0,
            crop_width: None,
            crop_height: None,
        }
    }

    /// Resolve into a request the pipeline can run.
    pub fn validate(&self, limits: &UploadLimits) -> Result<TransformRequest> {
        let width = self
            .width
            .ok_or_else(|| invalid("width", "none", "is required"))?;
        let height = self
            .height
            .ok_or_else(|| invalid("height", "none", "is required"))?;
        let width = limits.enforce_dimension("width", width)?;
        let height = limits.enforce_dimension("height", height)?;

        let format: OutputFormat = self.format.parse().inspect_err(|_| {
            warn!(format = %self.format, "Format must be one of JPEG, PNG, WEBP, AVIF");
        })?;

        if !(1..=100).contains(&self.quality) {
            return Err(invalid("quality", self.quality, "must be between 1 and 100"));
        }

        let crop = match (self.crop_width, self.crop_height) {
            (None, None) => None,
            (Some(w), Some(h)) => Some(CropRect::new(
                non_negative("crop_x", self.crop_x)?,
                non_negative("crop_y", self.crop_y)?,
                non_negative("crop_width", w)?,
                non_negative("crop_height", h)?,
            )),
            (Some(_), None) => {
                return Err(invalid(
                    "crop_height",
                    "none",
                    "crop_width and crop_height must be given together",
                ))
            }
            (None, Some(_)) => {
                return Err(invalid(
                    "crop_width",
                    "none",
                    "crop_width and crop_height must be given together",
                ))
            }
        };

        let mut request = TransformRequest::new(width, height, format)
            .with_quality(self.quality as u8)
            .with_strip_metadata(self.strip_metadata)
            .with_sharpen(self.smart_sharpen)
            .with_center_crop(self.center_crop);
        if let Some(crop) = crop {
            request = request.with_crop(crop);
        }
        Ok(request)
    }
}

fn non_negative(name: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| invalid(name, value, "must be a non-negative 32-bit integer"))
}
