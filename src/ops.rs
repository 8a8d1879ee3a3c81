// src/ops.rs
//
// Transform request model.
// A TransformRequest arrives fully populated and pre-validated; the pipeline
// never applies defaults of its own.

use crate::error::{PixelPerfectError, Result};
use std::fmt;
use std::str::FromStr;

/// Output format for encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    Avif,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::WebP,
        OutputFormat::Avif,
    ];

    /// Canonical upper-case name as accepted on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::WebP => "WEBP",
            Self::Avif => "AVIF",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Avif => "image/avif",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Avif => "avif",
        }
    }

    /// Suggested download name, e.g. `resized_image.webp`.
    pub fn download_filename(&self) -> String {
        format!("resized_image.{}", self.extension())
    }

    /// JPEG is the only target without an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, Self::Jpeg)
    }

    /// Formats the encoder embeds an EXIF blob into.
    pub fn embeds_exif(&self) -> bool {
        matches!(self, Self::Jpeg | Self::WebP)
    }
}

impl FromStr for OutputFormat {
    type Err = PixelPerfectError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "JPEG" | "JPG" => Ok(Self::Jpeg),
            "PNG" => Ok(Self::Png),
            "WEBP" => Ok(Self::WebP),
            "AVIF" => Ok(Self::Avif),
            _ => Err(PixelPerfectError::unsupported_format(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit source rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle only selects a region when both sides are non-zero.
    pub fn is_active(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Unsharp-mask parameters.
///
/// `percent` is the strength of the high-pass component added back, and
/// `threshold` is the minimum per-channel difference (in 8-bit levels) that
/// gets sharpened at all.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sharpening {
    pub radius: f32,
    pub percent: i32,
    pub threshold: i32,
}

impl Sharpening {
    /// The fixed "smart sharpen" preset: radius 2, 150 %, threshold 3.
    pub const SMART: Sharpening = Sharpening {
        radius: 2.0,
        percent: 150,
        threshold: 3,
    };
}

/// One transformation request, with every field resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformRequest {
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    /// 1-100; ignored for PNG.
    pub quality: u8,
    pub strip_metadata: bool,
    pub smart_sharpen: bool,
    pub center_crop: bool,
    pub crop: Option<CropRect>,
}

impl TransformRequest {
    /// Request with the service defaults for everything but the geometry.
    pub fn new(width: u32, height: u32, format: OutputFormat) -> Self {
        Self {
            width,
            height,
            format,
            quality: 80,
            strip_metadata: true,
            smart_sharpen: false,
            center_crop: false,
            crop: None,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn with_center_crop(mut self, center_crop: bool) -> Self {
        self.center_crop = center_crop;
        self
    }

    pub fn with_sharpen(mut self, smart_sharpen: bool) -> Self {
        self.smart_sharpen = smart_sharpen;
        self
    }

    pub fn with_strip_metadata(mut self, strip_metadata: bool) -> Self {
        self.strip_metadata = strip_metadata;
        self
    }

    /// Explicit crop rectangle, if one is active.
    pub fn active_crop(&self) -> Option<CropRect> {
        self.crop.filter(CropRect::is_active)
    }

    pub fn sharpening(&self) -> Option<Sharpening> {
        self.smart_sharpen.then_some(Sharpening::SMART)
    }
}
