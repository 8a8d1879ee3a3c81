// src/error.rs
//
// Unified error handling for pixelperfect
// Uses thiserror for simple, type-safe error handling
//
// Error taxonomy follows the pipeline stage that produced the failure:
// - Validation: request rejected before any decoding
// - Decode: bytes are not a readable image
// - Transform: crop/resize/sharpen could not be applied
// - Encode: codec library refused to serialize the buffer
// - Io: file access on the command-line surface
// - Internal: library bugs (panics caught at a codec boundary)

use std::borrow::Cow;
use thiserror::Error;

/// Message shown to clients for every non-validation failure.
pub const GENERIC_CLIENT_MESSAGE: &str =
    "Failed to process image. Please ensure the file is a valid image.";

/// Pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStage {
    Validation,
    Decode,
    Transform,
    Encode,
    Io,
    Internal,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Validation => "validation",
            ErrorStage::Decode => "decode",
            ErrorStage::Transform => "transform",
            ErrorStage::Encode => "encode",
            ErrorStage::Io => "io",
            ErrorStage::Internal => "internal",
        }
    }
}

/// pixelperfect error types
///
/// Every failure of a transform call is terminal: there is no retry and no
/// fallback to another output format.
#[derive(Debug, Error)]
pub enum PixelPerfectError {
    // File I/O Errors
    #[error("Failed to read file '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to memory-map file '{path}': {source}")]
    MmapFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWriteFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Validation Errors
    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("File size {size} bytes exceeds maximum {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Unsupported file type: {content_type}")]
    UnsupportedContentType { content_type: Cow<'static, str> },

    #[error("Unsupported output format: '{format}'. Expected JPEG, PNG, WEBP or AVIF")]
    UnsupportedFormat { format: Cow<'static, str> },

    // Decode Errors
    #[error("Unsupported input image format: {format}")]
    UnsupportedInputFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    // Transform Errors
    #[error("Crop bounds ({x}+{width}, {y}+{height}) exceed image dimensions ({img_width}x{img_height})")]
    InvalidCropBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        img_width: u32,
        img_height: u32,
    },

    #[error("Invalid crop dimensions: width={width}, height={height}")]
    InvalidCropDimensions { width: u32, height: u32 },

    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Failed to embed metadata into {format}: {message}")]
    MetadataEmbedFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

impl PixelPerfectError {
    pub fn file_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn mmap_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::MmapFailed {
            path: path.into(),
            source,
        }
    }

    pub fn file_write_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn file_too_large(size: u64, max: u64) -> Self {
        Self::FileTooLarge { size, max }
    }

    pub fn unsupported_content_type(content_type: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedContentType {
            content_type: content_type.into(),
        }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn unsupported_input_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedInputFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn invalid_crop_bounds(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        img_width: u32,
        img_height: u32,
    ) -> Self {
        Self::InvalidCropBounds {
            x,
            y,
            width,
            height,
            img_width,
            img_height,
        }
    }

    pub fn invalid_crop_dimensions(width: u32, height: u32) -> Self {
        Self::InvalidCropDimensions { width, height }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn metadata_embed_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::MetadataEmbedFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Get the pipeline stage this error belongs to
    pub fn stage(&self) -> ErrorStage {
        match self {
            Self::FileReadFailed { .. } | Self::MmapFailed { .. } | Self::FileWriteFailed { .. } => {
                ErrorStage::Io
            }

            Self::InvalidArgument { .. }
            | Self::FileTooLarge { .. }
            | Self::UnsupportedContentType { .. }
            | Self::UnsupportedFormat { .. } => ErrorStage::Validation,

            // Bomb-guard limits are hit while reading the header, before any pixels exist.
            Self::UnsupportedInputFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. } => ErrorStage::Decode,

            Self::InvalidCropBounds { .. }
            | Self::InvalidCropDimensions { .. }
            | Self::ResizeFailed { .. } => ErrorStage::Transform,

            Self::EncodeFailed { .. } | Self::MetadataEmbedFailed { .. } => ErrorStage::Encode,

            Self::InternalPanic { .. } => ErrorStage::Internal,
        }
    }

    /// True when the caller sent a bad request and can fix it by changing parameters.
    pub fn is_client_error(&self) -> bool {
        self.stage() == ErrorStage::Validation
    }

    /// Message safe to return to a client.
    ///
    /// Validation errors carry their own diagnostic; everything past validation
    /// collapses to [`GENERIC_CLIENT_MESSAGE`] so codec internals never leak.
    pub fn client_message(&self) -> Cow<'static, str> {
        if self.is_client_error() {
            Cow::Owned(self.to_string())
        } else {
            Cow::Borrowed(GENERIC_CLIENT_MESSAGE)
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, PixelPerfectError>;
