// src/engine/decoder.rs
//
// Decoder stage: bytes -> PixelBuffer.
// JPEG (mozjpeg), PNG (zune-png), WebP (libwebp), GIF (image), AVIF (avif-parse + rav1d).

use crate::codecs::avif_decode;
use crate::engine::buffer::{ColorMode, PixelBuffer};
use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::engine::io::extract_exif;
use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::PixelPerfectError;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use mozjpeg::Decompress;
use std::io::Cursor;
use tracing::debug;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

/// PNG IHDR color type for indexed images.
const PNG_COLOR_TYPE_INDEXED: u8 = 3;

/// Decode encoded bytes into a PixelBuffer.
///
/// The returned buffer carries the source color mode, the EXIF blob (JPEG,
/// PNG and WebP containers) and the detected container format.
pub fn decode(bytes: &[u8]) -> EngineResult<PixelBuffer> {
    if bytes.is_empty() {
        return Err(PixelPerfectError::decode_failed("empty input"));
    }
    let format = detect_format(bytes)
        .ok_or_else(|| PixelPerfectError::decode_failed("unrecognized image container"))?;

    let buffer = match format {
        ImageFormat::Jpeg => PixelBuffer::new(decode_jpeg(bytes)?),
        ImageFormat::Png if is_indexed_png(bytes) => {
            // Expand palette (and tRNS transparency) through the image crate.
            PixelBuffer::new(decode_with_image_crate(bytes, "decode:png:indexed")?)
                .with_mode(ColorMode::Palette)
        }
        ImageFormat::Png => PixelBuffer::new(decode_png_zune(bytes)?),
        ImageFormat::WebP => PixelBuffer::new(decode_webp_libwebp(bytes)?),
        ImageFormat::Gif => {
            PixelBuffer::new(decode_with_image_crate(bytes, "decode:gif")?)
                .with_mode(ColorMode::Palette)
        }
        ImageFormat::Avif => PixelBuffer::new(decode_avif(bytes)?),
        other => {
            return Err(PixelPerfectError::unsupported_input_format(format!(
                "{other:?}"
            )))
        }
    };

    let exif = match format {
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP => extract_exif(bytes),
        _ => None,
    };

    let buffer = buffer.with_exif(exif).with_source_format(Some(format));
    debug!(
        stage = "decode",
        format = ?format,
        width = buffer.width(),
        height = buffer.height(),
        mode = buffer.mode().as_str(),
        exif = buffer.exif().is_some(),
        "decoded"
    );
    Ok(buffer)
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

fn is_indexed_png(bytes: &[u8]) -> bool {
    // signature(8) + length(4) + "IHDR"(4) + width(4) + height(4) + depth(1) -> color type
    bytes.len() > 25 && &bytes[12..16] == b"IHDR" && bytes[25] == PNG_COLOR_TYPE_INDEXED
}

/// JPEG via mozjpeg, retrying with the image crate when libjpeg rejects the stream.
///
/// Truncated streams are final: the image crate would pad the missing
/// scanlines and report success.
fn decode_jpeg(bytes: &[u8]) -> EngineResult<DynamicImage> {
    if !has_complete_scan(bytes) {
        return Err(PixelPerfectError::decode_failed(
            "jpeg: image file is truncated",
        ));
    }
    match decode_jpeg_mozjpeg(bytes) {
        Ok(img) => Ok(img),
        Err(
            err @ (PixelPerfectError::DimensionExceedsLimit { .. }
            | PixelPerfectError::PixelCountExceedsLimit { .. }),
        ) => Err(err),
        Err(err) => {
            debug!(stage = "decode", error = %err, "mozjpeg failed, falling back to image crate");
            decode_with_image_crate(bytes, "decode:jpeg:fallback")
        }
    }
}

/// True when an EOI marker follows the last start-of-scan marker.
///
/// Entropy-coded data stuffs every 0xFF, so marker pairs cannot appear
/// inside a scan. An EXIF thumbnail's EOI sits before the main SOS and
/// does not count.
fn has_complete_scan(data: &[u8]) -> bool {
    data.windows(2)
        .rposition(|pair| pair == [0xFF, 0xDA])
        .is_some_and(|sos| data[sos..].windows(2).any(|pair| pair == [0xFF, 0xD9]))
}

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo)
///
/// Single-channel JPEGs decode to `ImageLuma8`; everything else to RGB8.
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !has_complete_scan(data) {
            return Err(PixelPerfectError::decode_failed(
                "mozjpeg: missing JPEG EOI marker",
            ));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            PixelPerfectError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;

        let width = decompress.width();
        let height = decompress.height();
        if width > MAX_DIMENSION as usize || height > MAX_DIMENSION as usize {
            return Err(PixelPerfectError::dimension_exceeds_limit(
                width.max(height).min(u32::MAX as usize) as u32,
                MAX_DIMENSION,
            ));
        }
        let width = width as u32;
        let height = height as u32;
        check_dimensions(width, height)?;

        if decompress.color_space() == mozjpeg::ColorSpace::JCS_GRAYSCALE {
            let mut decompress = decompress.grayscale().map_err(|e| {
                PixelPerfectError::decode_failed(format!(
                    "mozjpeg grayscale conversion failed: {e:?}"
                ))
            })?;
            let pixels: Vec<u8> = decompress.read_scanlines().map_err(|e| {
                PixelPerfectError::decode_failed(format!(
                    "mozjpeg: failed to read scanlines: {e:?}"
                ))
            })?;
            return GrayImage::from_raw(width, height, pixels)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| {
                    PixelPerfectError::decode_failed(
                        "mozjpeg: failed to create image from raw data",
                    )
                });
        }

        let mut decompress = decompress.rgb().map_err(|e| {
            PixelPerfectError::decode_failed(format!("mozjpeg rgb conversion failed: {e:?}"))
        })?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            PixelPerfectError::decode_failed(format!("mozjpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat_pixels: Vec<u8> = pixels.into_iter().flatten().collect();

        RgbImage::from_raw(width, height, flat_pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| {
                PixelPerfectError::decode_failed("mozjpeg: failed to create image from raw data")
            })
    })
}

/// Decode with the image crate under the panic policy.
fn decode_with_image_crate(data: &[u8], stage: &'static str) -> EngineResult<DynamicImage> {
    ensure_dimensions_safe(data)?;
    run_with_panic_policy(stage, || {
        image::load_from_memory(data)
            .map_err(|e| PixelPerfectError::decode_failed(format!("decode failed: {e}")))
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
pub fn decode_png_zune(data: &[u8]) -> EngineResult<DynamicImage> {
    ensure_dimensions_safe(data)?;
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        let pixels = decoder
            .decode()
            .map_err(|e| PixelPerfectError::decode_failed(format!("png: decode failed: {e}")))?;

        let info = decoder
            .info()
            .ok_or_else(|| PixelPerfectError::decode_failed("png: missing header info"))?;
        let width = info.width as u32;
        let height = info.height as u32;
        check_dimensions(width, height)?;
        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => {
                return Err(PixelPerfectError::decode_failed(
                    "png: unexpected non-U8 pixel buffer",
                ))
            }
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| PixelPerfectError::decode_failed("png: missing colorspace"))?;

        let built = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8),
            ColorSpace::RGBA => {
                RgbaImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba8)
            }
            ColorSpace::Luma => {
                GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8)
            }
            ColorSpace::LumaA => {
                GrayAlphaImage::from_raw(width, height, buf).map(DynamicImage::ImageLumaA8)
            }
            other => {
                return Err(PixelPerfectError::decode_failed(format!(
                    "png: unsupported colorspace {other:?}"
                )))
            }
        };
        built.ok_or_else(|| {
            PixelPerfectError::decode_failed(format!(
                "png: pixel buffer does not match {colorspace:?} {width}x{height}"
            ))
        })
    })
}

/// Decode WebP using libwebp. Animated WebP falls back to the image crate (first frame).
pub fn decode_webp_libwebp(data: &[u8]) -> EngineResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        // Parse header first to avoid allocating huge buffers on malformed files
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            PixelPerfectError::decode_failed("webp: failed to read bitstream features")
        })?;
        check_dimensions(features.width(), features.height())?;

        if features.has_animation() {
            return image::load_from_memory(data).map_err(|e| {
                PixelPerfectError::decode_failed(format!("webp (animated) decode failed: {e}"))
            });
        }

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| PixelPerfectError::decode_failed("webp: decode failed"))?;
        check_dimensions(decoded.width(), decoded.height())?;
        Ok(decoded.to_image())
    })
}

/// Decode AVIF after checking the container's declared size.
pub fn decode_avif(data: &[u8]) -> EngineResult<DynamicImage> {
    let (width, height) = avif_decode::avif_dimensions(data)?;
    check_dimensions(width, height)?;
    run_with_panic_policy("decode:avif", || avif_decode::decode_avif(data))
}

/// Check if image dimensions are within safe limits.
/// Returns an error if the image is too large (potential decompression bomb).
pub fn check_dimensions(width: u32, height: u32) -> EngineResult<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(PixelPerfectError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(PixelPerfectError::pixel_count_exceeds_limit(
            pixels, MAX_PIXELS,
        ));
    }
    Ok(())
}

/// Inspect encoded bytes and ensure the image dimensions are safe before decoding.
pub fn ensure_dimensions_safe(bytes: &[u8]) -> EngineResult<()> {
    let cursor = Cursor::new(bytes);
    if let Ok(reader) = ImageReader::new(cursor).with_guessed_format() {
        if let Ok((width, height)) = reader.into_dimensions() {
            return check_dimensions(width, height);
        }
    }
    Ok(())
}
