// src/codecs/avif_decode.rs
//
// AVIF input: avif-parse pulls the primary AV1 item out of the HEIF container,
// rav1d (pure-Rust dav1d) decodes it, and the YUV planes are converted to RGB8.
//
// libavif-sys is built encode-only (codec-rav1e), so decoding goes through rav1d.
#![deny(unsafe_op_in_unsafe_fn)]

use crate::error::PixelPerfectError;
use image::{DynamicImage, RgbImage};
use rav1d::include::dav1d::data::Dav1dData;
use rav1d::include::dav1d::dav1d::Dav1dSettings;
use rav1d::include::dav1d::headers::{
    DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
    DAV1D_PIXEL_LAYOUT_I444,
};
use rav1d::include::dav1d::picture::Dav1dPicture;
use rav1d::src::lib as dav1d;
use std::io::Cursor;
use std::ptr::NonNull;

type DecodeResult<T> = std::result::Result<T, PixelPerfectError>;

fn avif_error(message: impl Into<std::borrow::Cow<'static, str>>) -> PixelPerfectError {
    PixelPerfectError::decode_failed(message)
}

/// Dimensions recorded in the container, read without decoding any AV1 data.
pub fn avif_dimensions(data: &[u8]) -> DecodeResult<(u32, u32)> {
    let avif = avif_parse::read_avif(&mut Cursor::new(data))
        .map_err(|e| avif_error(format!("avif: container parse failed: {e:?}")))?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| avif_error(format!("avif: sequence header unreadable: {e:?}")))?;
    Ok((meta.max_frame_width.get(), meta.max_frame_height.get()))
}

/// Decode the primary image of an AVIF file to RGB8.
///
/// The alpha auxiliary item, if any, is not decoded.
pub fn decode_avif(data: &[u8]) -> DecodeResult<DynamicImage> {
    let avif = avif_parse::read_avif(&mut Cursor::new(data))
        .map_err(|e| avif_error(format!("avif: container parse failed: {e:?}")))?;
    let av1: &[u8] = &avif.primary_item;
    if av1.is_empty() {
        return Err(avif_error("avif: primary item is empty"));
    }

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    let settings_ptr = NonNull::new(settings.as_mut_ptr())
        .ok_or_else(|| avif_error("avif: settings allocation failed"))?;
    // SAFETY: dav1d_default_settings fully initializes the struct it is given.
    unsafe { dav1d::dav1d_default_settings(settings_ptr) };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    // SAFETY: both pointers reference live locals for the duration of the call.
    let rc = unsafe { dav1d::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(avif_error(format!("avif: rav1d open failed ({})", rc.0)));
    }

    let decoded = (|| {
        let mut input = Dav1dData::default();
        // SAFETY: dav1d_data_create returns a writable buffer of exactly av1.len() bytes.
        let buf = unsafe { dav1d::dav1d_data_create(NonNull::new(&mut input), av1.len()) };
        if buf.is_null() {
            return Err(avif_error("avif: rav1d data allocation failed"));
        }
        unsafe { std::ptr::copy_nonoverlapping(av1.as_ptr(), buf, av1.len()) };

        let rc = unsafe { dav1d::dav1d_send_data(ctx, NonNull::new(&mut input)) };
        if rc.0 != 0 {
            unsafe { dav1d::dav1d_data_unref(NonNull::new(&mut input)) };
            return Err(avif_error(format!("avif: rav1d send_data failed ({})", rc.0)));
        }

        // SAFETY: an all-zero Dav1dPicture is the documented "empty" value.
        let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
        let rc = unsafe { dav1d::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
        if rc.0 != 0 {
            return Err(avif_error(format!("avif: rav1d get_picture failed ({})", rc.0)));
        }

        let converted = picture_to_rgb(&pic);
        unsafe { dav1d::dav1d_picture_unref(NonNull::new(&mut pic)) };
        converted
    })();

    // SAFETY: ctx was opened above; close is the single release point on every path.
    unsafe { dav1d::dav1d_close(NonNull::new(&mut ctx)) };
    decoded
}

fn picture_to_rgb(pic: &Dav1dPicture) -> DecodeResult<DynamicImage> {
    let width = u32::try_from(pic.p.w).map_err(|_| avif_error("avif: negative width"))?;
    let height = u32::try_from(pic.p.h).map_err(|_| avif_error("avif: negative height"))?;
    let bpc = pic.p.bpc as u32;
    if width == 0 || height == 0 || !(8..=12).contains(&bpc) {
        return Err(avif_error(format!(
            "avif: unsupported picture {width}x{height} at {bpc} bits"
        )));
    }
    crate::engine::check_dimensions(width, height)?;

    let plane = |i: usize| -> DecodeResult<*const u8> {
        pic.data[i]
            .map(|p| p.as_ptr() as *const u8)
            .ok_or_else(|| avif_error(format!("avif: plane {i} missing")))
    };

    let layout = pic.p.layout;
    let planes = if layout == DAV1D_PIXEL_LAYOUT_I400 {
        let y = plane(0)?;
        YuvPlanes {
            y,
            u: y,
            v: y,
            y_stride: pic.stride[0],
            uv_stride: 0,
            width,
            height,
            bpc,
            subsample: (false, false),
            monochrome: true,
        }
    } else {
        let subsample = match layout {
            DAV1D_PIXEL_LAYOUT_I420 => (true, true),
            DAV1D_PIXEL_LAYOUT_I422 => (true, false),
            DAV1D_PIXEL_LAYOUT_I444 => (false, false),
            other => {
                return Err(avif_error(format!("avif: unsupported pixel layout {other}")));
            }
        };
        YuvPlanes {
            y: plane(0)?,
            u: plane(1)?,
            v: plane(2)?,
            y_stride: pic.stride[0],
            uv_stride: pic.stride[1],
            width,
            height,
            bpc,
            subsample,
            monochrome: false,
        }
    };

    // SAFETY: plane pointers and strides come from a picture that stays referenced
    // until the caller unrefs it after this returns.
    let rgb = unsafe { planes.to_rgb8() };
    RgbImage::from_raw(width, height, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| avif_error("avif: decoded buffer size mismatch"))
}

struct YuvPlanes {
    y: *const u8,
    u: *const u8,
    v: *const u8,
    /// Byte strides.
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    subsample: (bool, bool),
    monochrome: bool,
}

impl YuvPlanes {
    /// BT.601 full-range YCbCr to interleaved RGB8.
    ///
    /// # Safety
    /// Every plane pointer must be valid for `height` rows of `stride` bytes.
    unsafe fn to_rgb8(&self) -> Vec<u8> {
        let max = ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let scale = 255.0 / max;
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 3);

        for row in 0..self.height {
            let c_row = if self.subsample.1 { row / 2 } else { row };
            for col in 0..self.width {
                // SAFETY: forwarded from the caller's contract.
                let y = unsafe { self.sample(self.y, self.y_stride, col, row) };
                if self.monochrome {
                    let l = (y * scale).round().clamp(0.0, 255.0) as u8;
                    out.extend_from_slice(&[l, l, l]);
                    continue;
                }
                let c_col = if self.subsample.0 { col / 2 } else { col };
                let cb = unsafe { self.sample(self.u, self.uv_stride, c_col, c_row) } - center;
                let cr = unsafe { self.sample(self.v, self.uv_stride, c_col, c_row) } - center;

                let r = y + 1.402 * cr;
                let g = y - 0.344_136 * cb - 0.714_136 * cr;
                let b = y + 1.772 * cb;
                out.push((r * scale).round().clamp(0.0, 255.0) as u8);
                out.push((g * scale).round().clamp(0.0, 255.0) as u8);
                out.push((b * scale).round().clamp(0.0, 255.0) as u8);
            }
        }
        out
    }

    /// # Safety
    /// `(x, y)` must address a sample inside the plane.
    #[inline]
    unsafe fn sample(&self, plane: *const u8, stride: isize, x: u32, y: u32) -> f32 {
        let row = y as isize * stride;
        if self.bpc <= 8 {
            // SAFETY: forwarded from the caller's contract.
            (unsafe { *plane.offset(row + x as isize) }) as f32
        } else {
            // High bit depths are stored as native-endian u16.
            let ptr = unsafe { plane.offset(row + x as isize * 2) } as *const u16;
            (unsafe { ptr.read_unaligned() }) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_non_avif() {
        let err = decode_avif(b"definitely not an avif file").unwrap_err();
        assert!(err.to_string().contains("avif"));
    }

    #[test]
    fn test_dimensions_rejects_truncated_container() {
        let truncated = [0u8, 0, 0, 0x18, b'f', b't', b'y', b'p', b'a', b'v', b'i', b'f'];
        assert!(avif_dimensions(&truncated).is_err());
    }

    #[test]
    fn test_monochrome_conversion_scales_to_8bit() {
        // Two 10-bit luma samples: black and white.
        let luma: [u16; 2] = [0, 1023];
        let planes = YuvPlanes {
            y: luma.as_ptr() as *const u8,
            u: luma.as_ptr() as *const u8,
            v: luma.as_ptr() as *const u8,
            y_stride: 4,
            uv_stride: 0,
            width: 2,
            height: 1,
            bpc: 10,
            subsample: (false, false),
            monochrome: true,
        };
        let rgb = unsafe { planes.to_rgb8() };
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_neutral_chroma_is_gray() {
        let y = [100u8, 200];
        let chroma = [128u8];
        let planes = YuvPlanes {
            y: y.as_ptr(),
            u: chroma.as_ptr(),
            v: chroma.as_ptr(),
            y_stride: 2,
            uv_stride: 1,
            width: 2,
            height: 1,
            bpc: 8,
            subsample: (true, true),
            monochrome: false,
        };
        let rgb = unsafe { planes.to_rgb8() };
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }
}
