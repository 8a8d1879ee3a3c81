// src/engine/region.rs
//
// Region selection: which rectangle of the decoded image feeds the resizer.

use crate::engine::buffer::PixelBuffer;
use crate::ops::TransformRequest;

/// Source rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn covers(&self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width == width && self.height == height
    }
}

/// Pick the source rectangle for a request.
///
/// Precedence: an explicit crop with both sides > 0, then center crop, then the
/// whole image. The explicit rectangle is returned as given; bounds are checked
/// by the transformer.
pub fn select_region(buffer: &PixelBuffer, request: &TransformRequest) -> Region {
    let (src_w, src_h) = buffer.dimensions();

    if let Some(crop) = request.active_crop() {
        return Region {
            x: crop.x,
            y: crop.y,
            width: crop.width,
            height: crop.height,
        };
    }

    if request.center_crop {
        return center_crop_region(src_w, src_h, request.width, request.height);
    }

    Region::full(src_w, src_h)
}

/// Largest centered rectangle of the source with the target's aspect ratio.
///
/// Widths and heights are truncated toward zero, offsets use integer halving.
pub fn center_crop_region(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> Region {
    if src_w == 0 || src_h == 0 || target_w == 0 || target_h == 0 {
        return Region::full(src_w, src_h);
    }

    let target_ratio = target_w as f64 / target_h as f64;
    let source_ratio = src_w as f64 / src_h as f64;

    if source_ratio > target_ratio {
        let width = ((src_h as f64 * target_ratio) as u32).clamp(1, src_w);
        Region {
            x: (src_w - width) / 2,
            y: 0,
            width,
            height: src_h,
        }
    } else {
        let height = ((src_w as f64 / target_ratio) as u32).clamp(1, src_h);
        Region {
            x: 0,
            y: (src_h - height) / 2,
            width: src_w,
            height,
        }
    }
}
