#![no_main]

//! Fuzz target for region selection and the transform stage.
//! Geometry comes from the fuzzer; the pixels are a small synthetic image.

use arbitrary::{Arbitrary, Unstructured};
use image::{DynamicImage, RgbaImage};
use libfuzzer_sys::fuzz_target;
use pixelperfect::engine::{select_region, transform, PixelBuffer};
use pixelperfect::ops::{CropRect, OutputFormat, TransformRequest};

#[derive(Arbitrary, Debug)]
struct TransformSeed {
    src_width: u8,
    src_height: u8,
    dst_width: u16,
    dst_height: u16,
    format: u8,
    center_crop: bool,
    sharpen: bool,
    crop: Option<(u16, u16, u16, u16)>,
}

fn build_image(data: &[u8], width: u8, height: u8) -> DynamicImage {
    let w = (width as u32 % 64).max(1);
    let h = (height as u32 % 64).max(1);
    let mut buffer = vec![0u8; (w * h * 4) as usize];
    for (i, byte) in buffer.iter_mut().enumerate() {
        *byte = data.get(i % data.len().max(1)).copied().unwrap_or(0);
    }
    let rgba = RgbaImage::from_raw(w, h, buffer)
        .unwrap_or_else(|| RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 255])));
    DynamicImage::ImageRgba8(rgba)
}

fuzz_target!(|data: &[u8]| {
    let mut unstructured = Unstructured::new(data);
    let seed: TransformSeed = match TransformSeed::arbitrary(&mut unstructured) {
        Ok(s) => s,
        Err(_) => return,
    };

    let format = match seed.format % 4 {
        0 => OutputFormat::Jpeg,
        1 => OutputFormat::Png,
        2 => OutputFormat::WebP,
        _ => OutputFormat::Avif,
    };
    // Output side capped at 512 to stay inside the fuzz memory budget.
    let dst_w = (seed.dst_width as u32 % 512).max(1);
    let dst_h = (seed.dst_height as u32 % 512).max(1);

    let mut request = TransformRequest::new(dst_w, dst_h, format)
        .with_center_crop(seed.center_crop)
        .with_sharpen(seed.sharpen);
    if let Some((x, y, w, h)) = seed.crop {
        request = request.with_crop(CropRect::new(x as u32, y as u32, w as u32, h as u32));
    }

    let buffer = PixelBuffer::new(build_image(data, seed.src_width, seed.src_height));
    let region = select_region(&buffer, &request);
    if let Ok(out) = transform(buffer, region, &request) {
        assert_eq!(out.dimensions(), (dst_w, dst_h));
    }
});
