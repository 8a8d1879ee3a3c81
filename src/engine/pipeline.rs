// src/engine/pipeline.rs
//
// Transformer stage: alpha flattening for JPEG, crop, Lanczos3 resize, unsharp mask.
// Each step consumes the image and returns the derived one.

use crate::engine::buffer::{ColorMode, PixelBuffer};
use crate::engine::common::run_with_panic_policy;
use crate::engine::region::Region;
use crate::error::PixelPerfectError;
use crate::ops::{Sharpening, TransformRequest};
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::{
    imageops::FilterType, DynamicImage, GrayAlphaImage, GrayImage, ImageBuffer, Pixel, RgbImage,
    RgbaImage,
};
use tracing::debug;

type PipelineResult<T> = std::result::Result<T, PixelPerfectError>;

#[derive(Debug)]
pub struct ResizeError {
    pub source_dims: (u32, u32),
    pub target_dims: (u32, u32),
    pub reason: String,
}

impl ResizeError {
    pub fn new(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_dims,
            target_dims,
            reason: reason.into(),
        }
    }

    pub fn into_pixelperfect_error(self) -> PixelPerfectError {
        PixelPerfectError::resize_failed(self.source_dims, self.target_dims, self.reason)
    }
}

/// Run the transformer on a decoded buffer.
///
/// Steps, in order:
/// 1. Target without alpha (JPEG) and an alpha-bearing or palette source: composite onto white.
/// 2. Crop to `region` (rejects empty or out-of-bounds rectangles).
/// 3. Resize to exactly `request.width` x `request.height` with Lanczos3.
/// 4. Unsharp mask when `smart_sharpen` is set.
pub fn transform(
    buffer: PixelBuffer,
    region: Region,
    request: &TransformRequest,
) -> PipelineResult<PixelBuffer> {
    let buffer = if !request.format.supports_alpha() && buffer.mode().needs_flatten_for_jpeg() {
        debug!(stage = "transform", mode = buffer.mode().as_str(), "flatten onto white");
        buffer.map_image(flatten_onto_white)
    } else {
        buffer
    };

    let buffer = buffer.try_map_image(|img| crop_to_region(img, region))?;

    let (target_w, target_h) = (request.width, request.height);
    let buffer = buffer.try_map_image(|img| {
        resize_exact(img, target_w, target_h).map_err(ResizeError::into_pixelperfect_error)
    })?;

    let buffer = match request.sharpening() {
        Some(sharpening) => buffer.try_map_image(|img| {
            run_with_panic_policy("transform:sharpen", || Ok(unsharp_mask(img, sharpening)))
        })?,
        None => buffer,
    };

    debug!(
        stage = "transform",
        width = buffer.width(),
        height = buffer.height(),
        mode = buffer.mode().as_str(),
        sharpened = request.smart_sharpen,
        "transformed"
    );
    Ok(buffer)
}

/// Composite `c*a + 255*(1-a)` per channel, rounding to nearest. Output is always RGB8.
///
/// Fully transparent pixels become exactly white; images without an alpha
/// channel (e.g. a palette with no transparency) only change layout.
pub fn flatten_onto_white(img: DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return match img {
            DynamicImage::ImageRgb8(_) => img,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
    }

    let rgba = match img {
        DynamicImage::ImageRgba8(rgba) => rgba,
        other => other.to_rgba8(),
    };
    let (width, height) = rgba.dimensions();
    let mut out = RgbImage::new(width, height);
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        let a = a as u32;
        let inv = 255 - a;
        dst.0 = [r, g, b].map(|c| ((c as u32 * a + 255 * inv + 127) / 255) as u8);
    }
    DynamicImage::ImageRgb8(out)
}

/// Crop to `region`, validating it against the image bounds first.
pub fn crop_to_region(img: DynamicImage, region: Region) -> PipelineResult<DynamicImage> {
    let (img_w, img_h) = (img.width(), img.height());
    if region.width == 0 || region.height == 0 {
        return Err(PixelPerfectError::invalid_crop_dimensions(
            region.width,
            region.height,
        ));
    }
    let fits_x = region.x.checked_add(region.width).is_some_and(|r| r <= img_w);
    let fits_y = region.y.checked_add(region.height).is_some_and(|b| b <= img_h);
    if !fits_x || !fits_y {
        return Err(PixelPerfectError::invalid_crop_bounds(
            region.x,
            region.y,
            region.width,
            region.height,
            img_w,
            img_h,
        ));
    }
    if region.covers(img_w, img_h) {
        return Ok(img);
    }
    Ok(img.crop_imm(region.x, region.y, region.width, region.height))
}

/// Resize to exact dimensions (aspect ratio is the region selector's concern).
pub fn resize_exact(
    img: DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, ResizeError> {
    if (img.width(), img.height()) == (dst_width, dst_height) {
        return Ok(normalize_to_8bit(img));
    }
    fast_resize_owned(img, dst_width, dst_height)
}

fn default_resize_options() -> ResizeOptions {
    ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3))
}

/// 8-bit layouts the resizer and sharpener work on.
fn normalize_to_8bit(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => img,
        other => match ColorMode::of(&other) {
            ColorMode::L => DynamicImage::ImageLuma8(other.to_luma8()),
            ColorMode::La => DynamicImage::ImageLumaA8(other.to_luma_alpha8()),
            ColorMode::Rgba => DynamicImage::ImageRgba8(other.to_rgba8()),
            ColorMode::Rgb | ColorMode::Palette => DynamicImage::ImageRgb8(other.to_rgb8()),
        },
    }
}

/// Fast resize with owned DynamicImage (zero-copy for 8-bit layouts)
pub fn fast_resize_owned(
    img: DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, ResizeError> {
    let src_width = img.width();
    let src_height = img.height();

    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return Err(ResizeError::new(
            (src_width, src_height),
            (dst_width, dst_height),
            "invalid dimensions for resize",
        ));
    }

    // Take ownership of the pixel buffer instead of copying it.
    let (pixel_type, src_pixels): (PixelType, Vec<u8>) = match normalize_to_8bit(img) {
        DynamicImage::ImageLuma8(buf) => (PixelType::U8, buf.into_raw()),
        DynamicImage::ImageLumaA8(buf) => (PixelType::U8x2, buf.into_raw()),
        DynamicImage::ImageRgb8(buf) => (PixelType::U8x3, buf.into_raw()),
        DynamicImage::ImageRgba8(buf) => (PixelType::U8x4, buf.into_raw()),
        other => (PixelType::U8x4, other.to_rgba8().into_raw()),
    };

    fast_resize_internal_impl(
        src_width,
        src_height,
        src_pixels,
        pixel_type,
        dst_width,
        dst_height,
        default_resize_options(),
    )
    .map_err(|reason| ResizeError::new((src_width, src_height), (dst_width, dst_height), reason))
}

/// Layouts with an alpha channel are resized premultiplied to avoid dark fringes.
#[inline]
fn requires_premultiply(pixel_type: PixelType) -> bool {
    matches!(pixel_type, PixelType::U8x2 | PixelType::U8x4)
}

fn fast_resize_internal_impl(
    src_width: u32,
    src_height: u32,
    mut src_pixels: Vec<u8>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    options: ResizeOptions,
) -> std::result::Result<DynamicImage, String> {
    let pixel_count = (src_width as usize)
        .checked_mul(src_height as usize)
        .ok_or_else(|| "image dimensions overflow during resize".to_string())?;
    let required_bytes = pixel_count
        .checked_mul(pixel_type.size())
        .ok_or_else(|| "image buffer size overflow during resize".to_string())?;

    if src_pixels.len() < required_bytes {
        return Err(format!(
            "fir source image invalid buffer size. expected {required_bytes} bytes, got {} bytes",
            src_pixels.len()
        ));
    }

    let primary_result = match fir::images::Image::from_slice_u8(
        src_width,
        src_height,
        src_pixels.as_mut_slice(),
        pixel_type,
    ) {
        Ok(src_image) => {
            resize_with_source_image(src_image, pixel_type, dst_width, dst_height, &options)
        }
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let aligned_image = copy_pixels_to_aligned_image(
                src_width,
                src_height,
                pixel_type,
                &src_pixels,
                required_bytes,
            )?;
            resize_with_source_image(aligned_image, pixel_type, dst_width, dst_height, &options)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    match primary_result {
        Ok(img) => Ok(img),
        Err(err) => {
            debug!(stage = "transform", error = %err, "fir resize failed, using image crate");
            resize_with_image_crate_fallback(
                &src_pixels,
                src_width,
                src_height,
                pixel_type,
                dst_width,
                dst_height,
            )
            .map_err(|fallback_err| format!("{err}; image crate fallback failed: {fallback_err}"))
        }
    }
}

fn copy_pixels_to_aligned_image(
    width: u32,
    height: u32,
    pixel_type: PixelType,
    src_pixels: &[u8],
    required_bytes: usize,
) -> std::result::Result<fir::images::Image<'static>, String> {
    let mut aligned_image = fir::images::Image::new(width, height, pixel_type);
    let aligned_buffer = aligned_image.buffer_mut();
    if aligned_buffer.len() != required_bytes {
        return Err(format!(
            "fir alignment fallback buffer mismatch. expected {required_bytes} bytes, got {} bytes",
            aligned_buffer.len()
        ));
    }
    aligned_buffer.copy_from_slice(&src_pixels[..required_bytes]);
    Ok(aligned_image)
}

fn resize_with_image_crate_fallback(
    src_pixels: &[u8],
    src_width: u32,
    src_height: u32,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, String> {
    let filter = FilterType::Lanczos3;
    let pixels = src_pixels.to_vec();
    let missing = || format!("failed to build {pixel_type:?} image for fallback resize");
    match pixel_type {
        PixelType::U8 => {
            let buf = GrayImage::from_raw(src_width, src_height, pixels).ok_or_else(missing)?;
            Ok(DynamicImage::ImageLuma8(image::imageops::resize(
                &buf, dst_width, dst_height, filter,
            )))
        }
        PixelType::U8x2 => {
            let buf = GrayAlphaImage::from_raw(src_width, src_height, pixels).ok_or_else(missing)?;
            Ok(DynamicImage::ImageLumaA8(image::imageops::resize(
                &buf, dst_width, dst_height, filter,
            )))
        }
        PixelType::U8x3 => {
            let buf = RgbImage::from_raw(src_width, src_height, pixels).ok_or_else(missing)?;
            Ok(DynamicImage::ImageRgb8(image::imageops::resize(
                &buf, dst_width, dst_height, filter,
            )))
        }
        PixelType::U8x4 => {
            let buf = RgbaImage::from_raw(src_width, src_height, pixels).ok_or_else(missing)?;
            Ok(DynamicImage::ImageRgba8(image::imageops::resize(
                &buf, dst_width, dst_height, filter,
            )))
        }
        other => Err(format!("fallback resize does not support {other:?}")),
    }
}

/// True when every alpha sample is 255. Small images skip the scan and are
/// premultiplied unconditionally.
fn is_fully_opaque(image: &fir::images::Image, pixel_type: PixelType) -> bool {
    let channels = match pixel_type {
        PixelType::U8x2 => 2,
        PixelType::U8x4 => 4,
        _ => return true,
    };

    const THRESHOLD_PIXELS: u64 = 1_000_000;
    if (image.width() as u64).saturating_mul(image.height() as u64) < THRESHOLD_PIXELS {
        return false;
    }

    image
        .buffer()
        .iter()
        .skip(channels - 1)
        .step_by(channels)
        .all(|&alpha| alpha == 255)
}

fn resize_with_source_image(
    mut src_image: fir::images::Image<'_>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    options: &ResizeOptions,
) -> std::result::Result<DynamicImage, String> {
    let mut dst_image = fir::images::Image::new(dst_width, dst_height, pixel_type);

    let needs_premultiply =
        requires_premultiply(pixel_type) && !is_fully_opaque(&src_image, pixel_type);

    let mul_div = MulDiv::default();
    if needs_premultiply {
        mul_div
            .multiply_alpha_inplace(&mut src_image)
            .map_err(|e| format!("failed to premultiply alpha: {e}"))?;
    }

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, options)
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    if needs_premultiply {
        mul_div
            .divide_alpha_inplace(&mut dst_image)
            .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;
    }

    let dst_pixels = dst_image.into_vec();
    let built = match pixel_type {
        PixelType::U8 => {
            GrayImage::from_raw(dst_width, dst_height, dst_pixels).map(DynamicImage::ImageLuma8)
        }
        PixelType::U8x2 => GrayAlphaImage::from_raw(dst_width, dst_height, dst_pixels)
            .map(DynamicImage::ImageLumaA8),
        PixelType::U8x3 => {
            RgbImage::from_raw(dst_width, dst_height, dst_pixels).map(DynamicImage::ImageRgb8)
        }
        PixelType::U8x4 => {
            RgbaImage::from_raw(dst_width, dst_height, dst_pixels).map(DynamicImage::ImageRgba8)
        }
        other => return Err(format!("unsupported pixel type after resize: {other:?}")),
    };
    built.ok_or_else(|| "failed to create image from resized data".to_string())
}

/// Unsharp mask on color channels; alpha passes through untouched.
///
/// For every sample, `diff = original - blurred`; when `|diff| >= threshold`
/// the sample becomes `clamp(original + diff * percent / 100)` (integer math).
pub fn unsharp_mask(img: DynamicImage, sharpening: Sharpening) -> DynamicImage {
    match normalize_to_8bit(img) {
        DynamicImage::ImageLuma8(buf) => {
            DynamicImage::ImageLuma8(sharpen_buffer(buf, sharpening, None))
        }
        DynamicImage::ImageLumaA8(buf) => {
            DynamicImage::ImageLumaA8(sharpen_buffer(buf, sharpening, Some(1)))
        }
        DynamicImage::ImageRgb8(buf) => {
            DynamicImage::ImageRgb8(sharpen_buffer(buf, sharpening, None))
        }
        DynamicImage::ImageRgba8(buf) => {
            DynamicImage::ImageRgba8(sharpen_buffer(buf, sharpening, Some(3)))
        }
        other => DynamicImage::ImageRgba8(sharpen_buffer(other.to_rgba8(), sharpening, Some(3))),
    }
}

fn sharpen_buffer<P>(
    mut buf: ImageBuffer<P, Vec<u8>>,
    sharpening: Sharpening,
    alpha_channel: Option<usize>,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let blurred = image::imageops::blur(&buf, sharpening.radius);
    let channels = P::CHANNEL_COUNT as usize;

    for (i, (sample, &soft)) in buf.iter_mut().zip(blurred.iter()).enumerate() {
        if alpha_channel == Some(i % channels) {
            continue;
        }
        let original = *sample as i32;
        let diff = original - soft as i32;
        if diff.abs() >= sharpening.threshold {
            *sample = (original + diff * sharpening.percent / 100).clamp(0, 255) as u8;
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{CropRect, OutputFormat};
    use image::{GenericImageView, LumaA, Rgb, Rgba};

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn create_test_image_rgba(width: u32, height: u32, alpha: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, alpha])
        }))
    }

    /// Vertical black/white edge: the only structure sharpening can act on.
    fn create_edge_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([40, 40, 40])
            } else {
                Rgb([210, 210, 210])
            }
        }))
    }

    mod flatten_tests {
        use super::*;

        #[test]
        fn transparent_pixels_become_white() {
            let img = create_test_image_rgba(4, 4, 0);
            let flat = flatten_onto_white(img);
            assert!(matches!(flat, DynamicImage::ImageRgb8(_)));
            assert!(flat.to_rgb8().pixels().all(|p| p.0 == [255, 255, 255]));
        }

        #[test]
        fn opaque_pixels_are_unchanged() {
            let img = create_test_image_rgba(4, 4, 255);
            let expected = img.to_rgb8();
            assert_eq!(flatten_onto_white(img).to_rgb8(), expected);
        }

        #[test]
        fn half_alpha_blends_toward_white() {
            let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 100, 255, 128])));
            let px = flatten_onto_white(img).to_rgb8().get_pixel(0, 0).0;
            // (c*128 + 255*127 + 127) / 255
            assert_eq!(px, [127, 177, 255]);
        }

        #[test]
        fn gray_alpha_is_composited() {
            let img = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(2, 2, LumaA([0, 0])));
            let flat = flatten_onto_white(img);
            assert_eq!(flat.to_rgb8().get_pixel(1, 1).0, [255, 255, 255]);
        }

        #[test]
        fn image_without_alpha_only_changes_layout() {
            let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, image::Luma([77])));
            let flat = flatten_onto_white(img);
            assert_eq!(flat.to_rgb8().get_pixel(0, 0).0, [77, 77, 77]);
        }
    }

    mod crop_tests {
        use super::*;

        #[test]
        fn test_crop_valid() {
            let img = create_test_image(100, 100);
            let region = Region {
                x: 10,
                y: 20,
                width: 30,
                height: 40,
            };
            let cropped = crop_to_region(img, region).unwrap();
            assert_eq!(cropped.dimensions(), (30, 40));
            assert_eq!(cropped.to_rgb8().get_pixel(0, 0).0, [10, 20, 128]);
        }

        #[test]
        fn test_crop_out_of_bounds() {
            let img = create_test_image(100, 100);
            let region = Region {
                x: 80,
                y: 0,
                width: 30,
                height: 10,
            };
            let err = crop_to_region(img, region).unwrap_err();
            assert!(matches!(err, PixelPerfectError::InvalidCropBounds { .. }));
        }

        #[test]
        fn test_crop_overflowing_offsets_are_rejected() {
            let img = create_test_image(10, 10);
            let region = Region {
                x: u32::MAX,
                y: 0,
                width: 2,
                height: 2,
            };
            assert!(matches!(
                crop_to_region(img, region),
                Err(PixelPerfectError::InvalidCropBounds { .. })
            ));
        }

        #[test]
        fn test_crop_zero_area() {
            let img = create_test_image(10, 10);
            let region = Region {
                x: 0,
                y: 0,
                width: 0,
                height: 5,
            };
            assert!(matches!(
                crop_to_region(img, region),
                Err(PixelPerfectError::InvalidCropDimensions { .. })
            ));
        }

        #[test]
        fn test_crop_entire_image_is_noop() {
            let img = create_test_image(50, 50);
            let cropped = crop_to_region(img, Region::full(50, 50)).unwrap();
            assert_eq!(cropped.dimensions(), (50, 50));
        }
    }

    mod resize_tests {
        use super::*;

        #[test]
        fn test_resize_rgb_exact() {
            let resized = resize_exact(create_test_image(200, 100), 50, 70).unwrap();
            assert_eq!(resized.dimensions(), (50, 70));
            assert!(matches!(resized, DynamicImage::ImageRgb8(_)));
        }

        #[test]
        fn test_resize_keeps_layouts() {
            let luma = DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 40, image::Luma([9])));
            assert!(matches!(
                resize_exact(luma, 10, 10).unwrap(),
                DynamicImage::ImageLuma8(_)
            ));

            let la = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(40, 40, LumaA([9, 100])));
            assert!(matches!(
                resize_exact(la, 10, 10).unwrap(),
                DynamicImage::ImageLumaA8(_)
            ));

            let rgba = create_test_image_rgba(40, 40, 200);
            assert!(matches!(
                resize_exact(rgba, 10, 10).unwrap(),
                DynamicImage::ImageRgba8(_)
            ));
        }

        #[test]
        fn test_resize_upscale() {
            let resized = resize_exact(create_test_image(10, 10), 35, 21).unwrap();
            assert_eq!(resized.dimensions(), (35, 21));
        }

        #[test]
        fn test_resize_flat_color_stays_flat() {
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([10, 200, 30])));
            let resized = resize_exact(img, 16, 16).unwrap().to_rgb8();
            assert!(resized.pixels().all(|p| p.0 == [10, 200, 30]));
        }

        #[test]
        fn test_resize_rejects_zero_target() {
            let err = fast_resize_owned(create_test_image(10, 10), 0, 5).unwrap_err();
            assert_eq!(err.target_dims, (0, 5));
            let err = err.into_pixelperfect_error();
            assert!(matches!(err, PixelPerfectError::ResizeFailed { .. }));
        }

        #[test]
        fn image_crate_fallback_resizes_rgba() {
            let pixels = vec![100u8; 8 * 8 * 4];
            let out =
                resize_with_image_crate_fallback(&pixels, 8, 8, PixelType::U8x4, 3, 5).unwrap();
            assert_eq!(out.dimensions(), (3, 5));
        }

        #[test]
        fn image_crate_fallback_resizes_gray_alpha() {
            let pixels = vec![100u8; 8 * 8 * 2];
            let out =
                resize_with_image_crate_fallback(&pixels, 8, 8, PixelType::U8x2, 4, 4).unwrap();
            assert!(matches!(out, DynamicImage::ImageLumaA8(_)));
        }
    }

    mod sharpen_tests {
        use super::*;

        #[test]
        fn flat_image_is_unchanged() {
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 20, Rgb([90, 90, 90])));
            let expected = img.to_rgb8();
            let out = unsharp_mask(img, Sharpening::SMART);
            assert_eq!(out.to_rgb8(), expected);
        }

        #[test]
        fn edges_gain_contrast() {
            let img = create_edge_image(20, 20);
            let out = unsharp_mask(img, Sharpening::SMART).to_rgb8();
            // Dark side next to the edge gets darker, bright side brighter.
            assert!(out.get_pixel(9, 1).0[0] < 40);
            assert!(out.get_pixel(10, 1).0[0] > 210);
            // Far from the edge nothing moves.
            assert_eq!(out.get_pixel(0, 1).0[0], 40);
            assert_eq!(out.get_pixel(19, 1).0[0], 210);
        }

        #[test]
        fn alpha_is_untouched() {
            let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(20, 20, |x, _| {
                if x < 10 {
                    Rgba([0, 0, 0, 10])
                } else {
                    Rgba([255, 255, 255, 240])
                }
            }));
            let out = unsharp_mask(img.clone(), Sharpening::SMART).to_rgba8();
            for (a, b) in out.pixels().zip(img.to_rgba8().pixels()) {
                assert_eq!(a.0[3], b.0[3]);
            }
        }
    }

    mod transform_tests {
        use super::*;

        #[test]
        fn explicit_crop_then_resize() {
            let buffer = PixelBuffer::new(create_test_image(400, 300));
            let req = TransformRequest::new(100, 75, OutputFormat::Jpeg)
                .with_crop(CropRect::new(50, 50, 200, 150));
            let region = crate::engine::region::select_region(&buffer, &req);
            let out = transform(buffer, region, &req).unwrap();
            assert_eq!(out.dimensions(), (100, 75));
            assert_eq!(out.mode(), ColorMode::Rgb);
        }

        #[test]
        fn jpeg_target_flattens_alpha() {
            let buffer = PixelBuffer::new(create_test_image_rgba(32, 32, 0));
            let req = TransformRequest::new(16, 16, OutputFormat::Jpeg);
            let out = transform(buffer, Region::full(32, 32), &req).unwrap();
            assert_eq!(out.mode(), ColorMode::Rgb);
            assert!(out.image().to_rgb8().pixels().all(|p| p.0 == [255, 255, 255]));
        }

        #[test]
        fn png_target_keeps_alpha() {
            let buffer = PixelBuffer::new(create_test_image_rgba(32, 32, 0));
            let req = TransformRequest::new(16, 16, OutputFormat::Png);
            let out = transform(buffer, Region::full(32, 32), &req).unwrap();
            assert_eq!(out.mode(), ColorMode::Rgba);
        }

        #[test]
        fn only_targets_without_alpha_flatten() {
            for format in [
                OutputFormat::Jpeg,
                OutputFormat::Png,
                OutputFormat::WebP,
                OutputFormat::Avif,
            ] {
                let buffer = PixelBuffer::new(create_test_image_rgba(16, 16, 0));
                let req = TransformRequest::new(16, 16, format);
                let out = transform(buffer, Region::full(16, 16), &req).unwrap();
                assert_eq!(
                    out.image().color().has_alpha(),
                    format.supports_alpha(),
                    "{format}"
                );
            }
        }

        #[test]
        fn palette_without_transparency_keeps_pixels_for_jpeg() {
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([12, 34, 56])));
            let buffer = PixelBuffer::new(img).with_mode(ColorMode::Palette);
            let req = TransformRequest::new(8, 8, OutputFormat::Jpeg);
            let out = transform(buffer, Region::full(8, 8), &req).unwrap();
            assert_eq!(out.image().to_rgb8().get_pixel(3, 3).0, [12, 34, 56]);
        }

        #[test]
        fn out_of_bounds_region_is_transform_error() {
            let buffer = PixelBuffer::new(create_test_image(10, 10));
            let req = TransformRequest::new(5, 5, OutputFormat::Png);
            let region = Region {
                x: 5,
                y: 5,
                width: 10,
                height: 10,
            };
            let err = transform(buffer, region, &req).unwrap_err();
            assert_eq!(err.stage(), crate::error::ErrorStage::Transform);
        }

        #[test]
        fn sharpen_changes_edge_output() {
            let req = TransformRequest::new(40, 20, OutputFormat::Png);
            let plain = transform(
                PixelBuffer::new(create_edge_image(80, 40)),
                Region::full(80, 40),
                &req,
            )
            .unwrap();
            let sharp = transform(
                PixelBuffer::new(create_edge_image(80, 40)),
                Region::full(80, 40),
                &req.clone().with_sharpen(true),
            )
            .unwrap();
            assert_ne!(plain.image().to_rgb8(), sharp.image().to_rgb8());
        }
    }
}
