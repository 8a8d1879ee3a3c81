//! Regression tests for fuzz-found crashes.
//! Each test should be cheap (single input) and run in the normal test suite.

use pixelperfect::engine::{decode, decode_jpeg_mozjpeg, process_image};
use pixelperfect::error::ErrorStage;
use pixelperfect::inspect_header_from_bytes;
use pixelperfect::ops::{OutputFormat, TransformRequest};

fn png_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    // CRC is left zeroed; decoders must reject without panicking.
    out.extend_from_slice(&[0, 0, 0, 0]);
}

#[test]
fn fuzz_regression_png_signature_only() {
    let data = b"\x89PNG\r\n\x1a\n";
    assert!(inspect_header_from_bytes(data).is_err());
    let err = decode(data).unwrap_err();
    assert_eq!(err.stage(), ErrorStage::Decode);
}

#[test]
fn fuzz_regression_png_zero_width_header() {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&0u32.to_be_bytes());
    ihdr.extend_from_slice(&16u32.to_be_bytes());
    ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);
    png_chunk(&mut data, b"IHDR", &ihdr);
    png_chunk(&mut data, b"IEND", &[]);

    assert!(decode(&data).is_err());
}

#[test]
fn fuzz_regression_jpeg_soi_then_garbage() {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
    data.extend(std::iter::repeat(0x41).take(64));

    // Both JPEG paths must fail cleanly.
    assert!(decode_jpeg_mozjpeg(&data).is_err());
    assert!(decode(&data).is_err());
}

#[test]
fn fuzz_regression_avif_ftyp_without_items() {
    // A lone ftyp box: recognized as AVIF, but there is no primary item.
    let mut data = Vec::new();
    data.extend_from_slice(&20u32.to_be_bytes());
    data.extend_from_slice(b"ftypavif");
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(b"avif");

    let req = TransformRequest::new(8, 8, OutputFormat::Png);
    let err = process_image(&data, &req).unwrap_err();
    assert_ne!(err.stage(), ErrorStage::Internal);
}

#[test]
fn fuzz_regression_gif_header_only() {
    let data = b"GIF89a";
    let req = TransformRequest::new(8, 8, OutputFormat::Jpeg);
    assert!(process_image(data, &req).is_err());
}
