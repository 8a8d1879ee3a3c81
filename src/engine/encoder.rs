// src/engine/encoder.rs
//
// Encoder operations: JPEG (mozjpeg), PNG (oxipng), WebP (libwebp), AVIF (libavif)

use crate::codecs::avif_safe::{
    AvifEncoderSettings, AvifPixelLayout, SafeAvifEncoder, SafeAvifImage,
};
use crate::engine::buffer::PixelBuffer;
use crate::engine::common::run_with_panic_policy;
use crate::engine::io::embed_exif;
use crate::engine::MAX_DIMENSION;
use crate::error::PixelPerfectError;
use crate::ops::{OutputFormat, TransformRequest};
use image::{DynamicImage, ImageFormat};
use libavif_sys::AVIF_PIXEL_FORMAT_YUV420;
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::borrow::Cow;
use std::cmp;
use std::io::Cursor;
use tracing::debug;

type EncoderResult<T> = std::result::Result<T, PixelPerfectError>;

/// Derives per-format encoder settings from a 1-100 quality value.
///
/// Quality bands:
/// - High (>=85): AVIF speed 6
/// - Balanced (70-84): AVIF speed 7
/// - Fast (50-69): AVIF speed 8
/// - Fastest (<50): AVIF speed 9
///
/// `optimize` enables the expensive lossless passes (optimized Huffman tables
/// and scan layout for JPEG, method 6 for WebP).
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    quality: f32,
    optimize: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QualityBand {
    High,
    Balanced,
    Fast,
    Fastest,
}

impl QualitySettings {
    pub fn new(quality: u8) -> Self {
        Self::with_optimize(quality, true)
    }

    pub fn with_optimize(quality: u8, optimize: bool) -> Self {
        Self {
            quality: quality.clamp(1, 100) as f32,
            optimize,
        }
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    fn band(&self) -> QualityBand {
        if self.quality >= 85.0 {
            QualityBand::High
        } else if self.quality >= 70.0 {
            QualityBand::Balanced
        } else if self.quality >= 50.0 {
            QualityBand::Fast
        } else {
            QualityBand::Fastest
        }
    }

    pub fn jpeg_smoothing(&self) -> u8 {
        if self.quality >= 90.0 {
            0
        } else if self.quality >= 70.0 {
            5
        } else if self.quality >= 60.0 {
            10
        } else {
            18
        }
    }

    pub fn webp_method(&self) -> i32 {
        if self.optimize {
            6
        } else {
            4
        }
    }

    pub fn webp_sns_strength(&self) -> i32 {
        match self.band() {
            QualityBand::High => 50,
            QualityBand::Balanced => 70,
            QualityBand::Fast | QualityBand::Fastest => 80,
        }
    }

    pub fn webp_filter_strength(&self) -> i32 {
        if self.quality >= 80.0 {
            20
        } else if self.quality >= 60.0 {
            30
        } else {
            40
        }
    }

    pub fn webp_filter_sharpness(&self) -> i32 {
        match self.band() {
            QualityBand::High => 2,
            QualityBand::Balanced | QualityBand::Fast | QualityBand::Fastest => 0,
        }
    }

    // libavif speed: 0 (slowest/best) to 10 (fastest/worst)
    pub fn avif_speed(&self) -> i32 {
        match self.band() {
            QualityBand::High => 6,
            QualityBand::Balanced => 7,
            QualityBand::Fast => 8,
            QualityBand::Fastest => 9,
        }
    }
}

/// Encode a transformed buffer into the requested format.
///
/// The EXIF blob carried from decode is re-embedded only when metadata is
/// kept and the target container supports it.
pub fn encode(buffer: &PixelBuffer, request: &TransformRequest) -> EncoderResult<Vec<u8>> {
    let img = buffer.image();
    let encoded = match request.format {
        OutputFormat::Jpeg => encode_jpeg(img, request.quality)?,
        OutputFormat::Png => encode_png(img)?,
        OutputFormat::WebP => encode_webp(img, request.quality)?,
        OutputFormat::Avif => encode_avif(img, request.quality)?,
    };

    let encoded = match exif_to_embed(buffer, request) {
        Some(exif) => {
            debug!(stage = "encode", bytes = exif.len(), "embedding exif");
            embed_exif(encoded, request.format, exif)?
        }
        None => encoded,
    };

    debug!(
        stage = "encode",
        format = request.format.as_str(),
        quality = request.quality,
        bytes = encoded.len(),
        "encoded"
    );
    Ok(encoded)
}

/// The EXIF blob `encode` writes into the output, if any.
pub(crate) fn exif_to_embed<'a>(
    buffer: &'a PixelBuffer,
    request: &TransformRequest,
) -> Option<&'a [u8]> {
    buffer
        .exif()
        .filter(|_| !request.strip_metadata && request.format.embeds_exif())
}

/// Encode to JPEG using mozjpeg with optimized coding and progressive scans.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    encode_jpeg_with_settings(img, QualitySettings::new(quality))
}

pub fn encode_jpeg_with_settings(
    img: &DynamicImage,
    settings: QualitySettings,
) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        // Zero-copy when already RGB8
        let rgb: Cow<'_, image::RgbImage> = match img {
            DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
            _ => Cow::Owned(img.to_rgb8()),
        };
        let (w, h) = rgb.dimensions();
        let pixels: &[u8] = rgb.as_raw();

        if w == 0 || h == 0 {
            return Err(PixelPerfectError::encode_failed(
                "jpeg",
                "invalid image dimensions: width or height is zero",
            ));
        }
        if w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(PixelPerfectError::dimension_exceeds_limit(
                w.max(h),
                MAX_DIMENSION,
            ));
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.quality());
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();

        if settings.optimize {
            comp.set_optimize_coding(true);
            comp.set_optimize_scans(true);
            comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        } else {
            comp.set_optimize_coding(false);
            comp.set_optimize_scans(false);
        }
        comp.set_smoothing_factor(settings.jpeg_smoothing());

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);

        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                PixelPerfectError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to start compress: {e:?}"),
                )
            })?;

            let stride = w as usize * 3;
            for row in pixels.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    PixelPerfectError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                PixelPerfectError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }

        Ok(output)
    })
}

/// Encode to PNG with the image crate, then recompress losslessly with oxipng.
pub fn encode_png(img: &DynamicImage) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| PixelPerfectError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(4);
        options.strip = oxipng::StripChunks::None;

        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            PixelPerfectError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Encode to lossy WebP. Alpha is kept when the buffer has it.
pub fn encode_webp(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let settings = QualitySettings::new(quality);
        let (w, h) = (img.width(), img.height());

        let pixels: Cow<'_, [u8]>;
        let encoder = if img.color().has_alpha() {
            pixels = match img {
                DynamicImage::ImageRgba8(rgba) => Cow::Borrowed(rgba.as_raw().as_slice()),
                _ => Cow::Owned(img.to_rgba8().into_raw()),
            };
            webp::Encoder::from_rgba(&pixels, w, h)
        } else {
            pixels = match img {
                DynamicImage::ImageRgb8(rgb) => Cow::Borrowed(rgb.as_raw().as_slice()),
                _ => Cow::Owned(img.to_rgb8().into_raw()),
            };
            webp::Encoder::from_rgb(&pixels, w, h)
        };

        let mut config = webp::WebPConfig::new()
            .map_err(|_| PixelPerfectError::encode_failed("webp", "failed to create WebPConfig"))?;
        config.quality = settings.quality();
        config.method = settings.webp_method();
        config.sns_strength = settings.webp_sns_strength();
        config.autofilter = 1;
        config.filter_strength = settings.webp_filter_strength();
        config.filter_sharpness = settings.webp_filter_sharpness();

        let mem = encoder.encode_advanced(&config).map_err(|e| {
            PixelPerfectError::encode_failed("webp", format!("WebP encode failed: {e:?}"))
        })?;
        Ok(mem.to_vec())
    })
}

/// Encode to AVIF (YUV 4:2:0, sRGB/BT.709) using libavif.
pub fn encode_avif(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:avif", || {
        let settings = QualitySettings::new(quality);
        let (width, height) = (img.width(), img.height());

        let (layout, pixels): (AvifPixelLayout, Cow<'_, [u8]>) = if img.color().has_alpha() {
            let raw = match img {
                DynamicImage::ImageRgba8(rgba) => Cow::Borrowed(rgba.as_raw().as_slice()),
                _ => Cow::Owned(img.to_rgba8().into_raw()),
            };
            (AvifPixelLayout::Rgba8, raw)
        } else {
            let raw = match img {
                DynamicImage::ImageRgb8(rgb) => Cow::Borrowed(rgb.as_raw().as_slice()),
                _ => Cow::Owned(img.to_rgb8().into_raw()),
            };
            (AvifPixelLayout::Rgb8, raw)
        };

        let mut avif_image = SafeAvifImage::new(width, height, AVIF_PIXEL_FORMAT_YUV420)?;
        avif_image.set_srgb_color_properties();
        avif_image.fill_from_pixels(&pixels, layout)?;

        let encoder = SafeAvifEncoder::new(AvifEncoderSettings {
            quality: settings.quality() as u8,
            speed: settings.avif_speed(),
            max_threads: avif_encoder_threads(),
        })?;
        encoder.encode_still(&mut avif_image)
    })
}

fn avif_encoder_threads() -> i32 {
    let cpu_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    cmp::max(2, cmp::min(8, cpu_threads)) as i32
}
