// src/codecs/avif_safe.rs
//
// RAII wrappers for the libavif encoder FFI.
// Every libavif allocation is owned by exactly one wrapper and released in Drop,
// so early returns and unwinding through run_with_panic_policy never leak.
#![deny(unsafe_op_in_unsafe_fn)]

use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::PixelPerfectError;
use libavif_sys::*;
use std::ptr::NonNull;
#[cfg(test)]
use std::{cell::Cell, thread_local};

type AvifResult<T> = std::result::Result<T, PixelPerfectError>;

#[cfg(test)]
thread_local! {
    static TRACK_DROPS: Cell<bool> = Cell::new(false);
    static LIVE_IMAGES: Cell<usize> = Cell::new(0);
    static LIVE_ENCODERS: Cell<usize> = Cell::new(0);
    static LIVE_RWDATA: Cell<usize> = Cell::new(0);
}

#[cfg(test)]
fn track(counter: &'static std::thread::LocalKey<Cell<usize>>, delta: isize) {
    TRACK_DROPS.with(|flag| {
        if flag.get() {
            counter.with(|c| c.set((c.get() as isize + delta).max(0) as usize));
        }
    });
}

fn avif_error(message: impl Into<std::borrow::Cow<'static, str>>) -> PixelPerfectError {
    PixelPerfectError::encode_failed("avif", message)
}

fn check_result(result: avifResult, what: &str) -> AvifResult<()> {
    if result == AVIF_RESULT_OK {
        Ok(())
    } else {
        Err(avif_error(format!("{what} failed: {result:?}")))
    }
}

/// Interleaved 8-bit pixel layouts accepted by [`SafeAvifImage::fill_from_pixels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvifPixelLayout {
    Rgb8,
    Rgba8,
}

impl AvifPixelLayout {
    fn channels(self) -> u32 {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }

    fn avif_format(self) -> avifRGBFormat {
        match self {
            Self::Rgb8 => AVIF_RGB_FORMAT_RGB,
            Self::Rgba8 => AVIF_RGB_FORMAT_RGBA,
        }
    }
}

/// Owned `avifImage`.
pub struct SafeAvifImage {
    ptr: NonNull<avifImage>,
    width: u32,
    height: u32,
}

impl SafeAvifImage {
    fn validate_dimensions(width: u32, height: u32) -> AvifResult<()> {
        if width == 0 || height == 0 {
            return Err(avif_error(format!(
                "dimensions must be non-zero ({width}x{height})"
            )));
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(avif_error(format!(
                "dimensions exceed MAX_DIMENSION {MAX_DIMENSION} ({width}x{height})"
            )));
        }
        let pixels = width as u64 * height as u64;
        if pixels > MAX_PIXELS {
            return Err(avif_error(format!(
                "pixel count {pixels} exceeds MAX_PIXELS {MAX_PIXELS}"
            )));
        }
        Ok(())
    }

    /// 8-bit image with the given chroma subsampling.
    pub fn new(width: u32, height: u32, pixel_format: avifPixelFormat) -> AvifResult<Self> {
        Self::validate_dimensions(width, height)?;
        let raw = unsafe { avifImageCreate(width, height, 8, pixel_format) };
        let ptr = NonNull::new(raw).ok_or_else(|| avif_error("avifImageCreate returned null"))?;
        #[cfg(test)]
        track(&LIVE_IMAGES, 1);
        Ok(Self { ptr, width, height })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// sRGB output: BT.709 primaries, sRGB transfer, BT.709 matrix, full range.
    pub fn set_srgb_color_properties(&mut self) {
        // SAFETY: ptr is a live avifImage owned by self and &mut self is exclusive.
        unsafe {
            let raw = self.ptr.as_ptr();
            (*raw).colorPrimaries = AVIF_COLOR_PRIMARIES_BT709 as u16;
            (*raw).transferCharacteristics = AVIF_TRANSFER_CHARACTERISTICS_SRGB as u16;
            (*raw).matrixCoefficients = AVIF_MATRIX_COEFFICIENTS_BT709 as u16;
            (*raw).yuvRange = AVIF_RANGE_FULL;
        }
    }

    /// Convert interleaved pixels into the image's YUV (and alpha) planes.
    ///
    /// libavif allocates the planes itself; an RGBA layout also fills the alpha plane.
    pub fn fill_from_pixels(&mut self, pixels: &[u8], layout: AvifPixelLayout) -> AvifResult<()> {
        let row_bytes = self
            .width
            .checked_mul(layout.channels())
            .ok_or_else(|| avif_error("row bytes overflow"))?;
        let expected = row_bytes as usize * self.height as usize;
        if pixels.len() != expected {
            return Err(avif_error(format!(
                "pixel buffer is {} bytes, expected {expected}",
                pixels.len()
            )));
        }

        // SAFETY: rgb only borrows `pixels` for the duration of avifImageRGBToYUV,
        // which reads exactly rowBytes * height bytes (validated above).
        let result = unsafe {
            let mut rgb: avifRGBImage = std::mem::zeroed();
            avifRGBImageSetDefaults(&mut rgb, self.ptr.as_ptr());
            rgb.format = layout.avif_format();
            rgb.depth = 8;
            rgb.pixels = pixels.as_ptr() as *mut u8;
            rgb.rowBytes = row_bytes;
            avifImageRGBToYUV(self.ptr.as_ptr(), &rgb)
        };
        check_result(result, "avifImageRGBToYUV")
    }

    fn as_mut_ptr(&mut self) -> *mut avifImage {
        self.ptr.as_ptr()
    }
}

impl Drop for SafeAvifImage {
    fn drop(&mut self) {
        // SAFETY: ptr came from avifImageCreate and is destroyed exactly once.
        unsafe { avifImageDestroy(self.ptr.as_ptr()) };
        #[cfg(test)]
        track(&LIVE_IMAGES, -1);
    }
}

/// Encoder tuning derived from the request quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvifEncoderSettings {
    pub quality: u8,
    pub speed: i32,
    pub max_threads: i32,
}

/// Owned `avifEncoder`.
pub struct SafeAvifEncoder {
    ptr: NonNull<avifEncoder>,
}

impl SafeAvifEncoder {
    pub fn new(settings: AvifEncoderSettings) -> AvifResult<Self> {
        let raw = unsafe { avifEncoderCreate() };
        let ptr = NonNull::new(raw).ok_or_else(|| avif_error("avifEncoderCreate returned null"))?;
        #[cfg(test)]
        track(&LIVE_ENCODERS, 1);
        let quality = settings.quality.min(100) as i32;
        // SAFETY: freshly created encoder, exclusively owned.
        unsafe {
            let raw = ptr.as_ptr();
            (*raw).quality = quality;
            (*raw).qualityAlpha = quality;
            (*raw).speed = settings.speed;
            (*raw).maxThreads = settings.max_threads.max(1);
        }
        Ok(Self { ptr })
    }

    /// Encode a single still image and return the AVIF container bytes.
    pub fn encode_still(self, image: &mut SafeAvifImage) -> AvifResult<Vec<u8>> {
        let mut output = SafeAvifRwData::new();
        // SAFETY: both handles are live and exclusively borrowed for the call.
        let result = unsafe {
            avifEncoderAddImage(
                self.ptr.as_ptr(),
                image.as_mut_ptr(),
                1,
                AVIF_ADD_IMAGE_FLAG_SINGLE,
            )
        };
        check_result(result, "avifEncoderAddImage")?;

        let result = unsafe { avifEncoderFinish(self.ptr.as_ptr(), output.as_mut_ptr()) };
        check_result(result, "avifEncoderFinish")?;

        let bytes = output.as_slice().to_vec();
        if bytes.is_empty() {
            return Err(avif_error("encoder produced no output"));
        }
        Ok(bytes)
    }
}

impl Drop for SafeAvifEncoder {
    fn drop(&mut self) {
        // SAFETY: ptr came from avifEncoderCreate and is destroyed exactly once.
        unsafe { avifEncoderDestroy(self.ptr.as_ptr()) };
        #[cfg(test)]
        track(&LIVE_ENCODERS, -1);
    }
}

/// Owned `avifRWData` output buffer.
pub struct SafeAvifRwData {
    data: avifRWData,
}

impl SafeAvifRwData {
    pub fn new() -> Self {
        #[cfg(test)]
        track(&LIVE_RWDATA, 1);
        Self {
            // SAFETY: avifRWData is a plain {ptr, size} pair; all-zero is the empty value.
            data: unsafe { std::mem::zeroed() },
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.data.data.is_null() || self.data.size == 0 {
            &[]
        } else {
            // SAFETY: libavif guarantees `data` points to `size` initialized bytes.
            unsafe { std::slice::from_raw_parts(self.data.data, self.data.size) }
        }
    }

    fn as_mut_ptr(&mut self) -> *mut avifRWData {
        &mut self.data
    }
}

impl Default for SafeAvifRwData {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SafeAvifRwData {
    fn drop(&mut self) {
        // SAFETY: avifRWDataFree accepts empty buffers and resets the struct.
        unsafe { avifRWDataFree(&mut self.data) };
        #[cfg(test)]
        track(&LIVE_RWDATA, -1);
    }
}
