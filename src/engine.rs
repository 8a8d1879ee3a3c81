// src/engine.rs
//
// The core of pixelperfect. A four-stage pipeline:
// 1. Decoder: encoded bytes -> PixelBuffer (source color mode + EXIF blob)
// 2. Region selector: which rectangle of the source to keep
// 3. Transformer: flatten for JPEG, crop, Lanczos3 resize, optional unsharp mask
// 4. Encoder: PixelBuffer -> JPEG / PNG / WebP / AVIF bytes
//
// This file is a facade over the stage modules in engine/

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed source image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total source pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA. Beyond this is likely malicious.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod buffer;
mod common;
mod decoder;
mod encoder;
mod io;
mod pipeline;
mod region;
mod tasks;

pub use buffer::{ColorMode, PixelBuffer};
pub use common::{run_with_panic_policy, EngineResult};
pub use decoder::{check_dimensions, decode, decode_jpeg_mozjpeg, detect_format};
pub use encoder::{
    encode, encode_avif, encode_jpeg, encode_jpeg_with_settings, encode_png, encode_webp,
    QualitySettings,
};
pub use io::{embed_exif, extract_exif, Source};
pub use pipeline::{
    crop_to_region, fast_resize_owned, flatten_onto_white, resize_exact, transform,
    unsharp_mask, ResizeError,
};
pub use region::{center_crop_region, select_region, Region};
pub use tasks::{process_image, TransformResult, TransformTask};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorStage, PixelPerfectError};
    use crate::ops::{CropRect, OutputFormat, TransformRequest};
    use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage, RgbaImage};
    use std::io::Cursor;

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn encode_with(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    fn push_chunk(out: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        let mut typed = kind.to_vec();
        typed.extend_from_slice(body);
        out.extend_from_slice(&typed);
        out.extend_from_slice(&crc32(&typed).to_be_bytes());
    }

    /// PNG whose IHDR claims the given size; the IDAT is a stub that is never inflated.
    fn create_png_header_only(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&width.to_be_bytes());
        ihdr.extend_from_slice(&height.to_be_bytes());
        ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
        push_chunk(&mut data, b"IHDR", &ihdr);
        push_chunk(&mut data, b"IDAT", &[0x78, 0x01]);
        push_chunk(&mut data, b"IEND", &[]);
        data
    }

    fn crc32(bytes: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &b in bytes {
            crc ^= b as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
            }
        }
        !crc
    }

    #[test]
    fn stages_compose_by_hand() {
        let bytes = encode_with(&create_test_image(400, 300), ImageFormat::Png);
        let req = TransformRequest::new(100, 75, OutputFormat::Jpeg)
            .with_crop(CropRect::new(50, 50, 200, 150));

        let buffer = decode(&bytes).unwrap();
        let region = select_region(&buffer, &req);
        assert_eq!((region.width, region.height), (200, 150));
        let buffer = transform(buffer, region, &req).unwrap();
        let out = encode(&buffer, &req).unwrap();

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (100, 75));
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn decompression_bomb_header_is_rejected_before_decoding() {
        let bytes = create_png_header_only(40_000, 10);
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, PixelPerfectError::DimensionExceedsLimit { .. }));
        assert_eq!(err.stage(), ErrorStage::Decode);
    }

    #[test]
    fn pixel_count_limit_applies() {
        assert!(check_dimensions(MAX_DIMENSION, 1).is_ok());
        assert!(matches!(
            check_dimensions(20_000, 20_000),
            Err(PixelPerfectError::PixelCountExceedsLimit { .. })
        ));
    }

    #[test]
    fn rgba_png_to_webp_keeps_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(40, 40, |x, _| {
            image::Rgba([200, 10, 10, if x < 20 { 0 } else { 255 }])
        }));
        let bytes = encode_with(&img, ImageFormat::Png);
        let req = TransformRequest::new(20, 20, OutputFormat::WebP);
        let result = process_image(&bytes, &req).unwrap();
        let decoded = image::load_from_memory(&result.data).unwrap();
        assert!(decoded.color().has_alpha());
    }
}
