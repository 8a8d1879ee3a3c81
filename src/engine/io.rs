// src/engine/io.rs
//
// I/O helpers: input sources and EXIF transfer between containers.

use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::error::PixelPerfectError;
use crate::ops::OutputFormat;
use img_parts::jpeg::Jpeg;
use img_parts::webp::WebP;
use img_parts::{Bytes, DynImage, ImageEXIF};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Encoded input bytes, either owned or memory-mapped.
#[derive(Debug)]
pub enum Source {
    Memory(Vec<u8>),
    Mapped(Mmap),
}

impl Source {
    /// Memory-map a file. Empty files are read normally since they cannot be mapped.
    pub fn open(path: &Path) -> EngineResult<Self> {
        let display = path.to_string_lossy().into_owned();
        let file = File::open(path)
            .map_err(|e| PixelPerfectError::file_read_failed(display.clone(), e))?;
        let len = file
            .metadata()
            .map_err(|e| PixelPerfectError::file_read_failed(display.clone(), e))?
            .len();
        if len == 0 {
            return Ok(Source::Memory(Vec::new()));
        }
        // SAFETY: the mapping is read-only and lives as long as the Source.
        // Concurrent truncation of the file by another process is not guarded against.
        let mmap =
            unsafe { Mmap::map(&file) }.map_err(|e| PixelPerfectError::mmap_failed(display, e))?;
        Ok(Source::Mapped(mmap))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Source::Memory(data) => data.as_slice(),
            Source::Mapped(mmap) => mmap.as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for Source {
    fn from(data: Vec<u8>) -> Self {
        Source::Memory(data)
    }
}

/// Extract the raw EXIF (TIFF) blob from a JPEG, PNG or WebP container.
///
/// JPEG's `Exif\0\0` APP1 prefix is removed, so the result is the same
/// byte layout regardless of the source container.
pub fn extract_exif(data: &[u8]) -> Option<Vec<u8>> {
    let image = DynImage::from_bytes(Bytes::copy_from_slice(data)).ok()??;
    image
        .exif()
        .filter(|exif| !exif.is_empty())
        .map(|exif| exif.to_vec())
}

/// Embed an EXIF blob into already-encoded output.
///
/// Only JPEG and WebP carry EXIF; other formats are returned unchanged.
pub fn embed_exif(encoded: Vec<u8>, format: OutputFormat, exif: &[u8]) -> EngineResult<Vec<u8>> {
    match format {
        OutputFormat::Jpeg => embed_exif_jpeg(encoded, exif),
        OutputFormat::WebP => embed_exif_webp(encoded, exif),
        OutputFormat::Png | OutputFormat::Avif => Ok(encoded),
    }
}

/// Embed EXIF into JPEG as an APP1 segment using img-parts
pub fn embed_exif_jpeg(jpeg_data: Vec<u8>, exif: &[u8]) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg:embed_exif", || {
        let mut jpeg = Jpeg::from_bytes(Bytes::from(jpeg_data)).map_err(|e| {
            PixelPerfectError::metadata_embed_failed("jpeg", format!("parse failed: {e}"))
        })?;
        jpeg.set_exif(Some(Bytes::copy_from_slice(exif)));

        let mut output = Vec::new();
        jpeg.encoder().write_to(&mut output).map_err(|e| {
            PixelPerfectError::metadata_embed_failed("jpeg", format!("write failed: {e}"))
        })?;
        Ok(output)
    })
}

/// Embed EXIF into WebP as an EXIF chunk using img-parts
pub fn embed_exif_webp(webp_data: Vec<u8>, exif: &[u8]) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:webp:embed_exif", || {
        let mut webp = WebP::from_bytes(Bytes::from(webp_data)).map_err(|e| {
            PixelPerfectError::metadata_embed_failed("webp", format!("parse failed: {e}"))
        })?;
        webp.set_exif(Some(Bytes::copy_from_slice(exif)));

        let mut output = Vec::new();
        webp.encoder().write_to(&mut output).map_err(|e| {
            PixelPerfectError::metadata_embed_failed("webp", format!("write failed: {e}"))
        })?;
        Ok(output)
    })
}
