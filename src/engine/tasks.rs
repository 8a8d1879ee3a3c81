// src/engine/tasks.rs
//
// Pipeline driver: decode -> select region -> transform -> encode, with metrics.
// A task is synchronous and owns its input; run many of them on worker threads
// to process images concurrently.

use crate::engine::decoder::{decode, detect_format};
use crate::engine::encoder::{encode, exif_to_embed};
use crate::engine::io::Source;
use crate::engine::pipeline::transform;
use crate::engine::region::select_region;
use crate::error::PixelPerfectError;
use crate::ops::TransformRequest;
use crate::{TransformMetrics, PROCESSING_METRICS_VERSION};
use image::ImageFormat;
use std::time::Instant;
use tracing::debug;

type TaskResult<T> = std::result::Result<T, PixelPerfectError>;

/// Resource usage information for telemetry
#[derive(Clone, Copy)]
struct ResourceUsage {
    cpu_time: f64, // User + system CPU time in seconds
}

/// Current process CPU usage. None on unsupported platforms or if getrusage fails.
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
fn get_resource_usage() -> Option<ResourceUsage> {
    use libc::{getrusage, rusage, RUSAGE_SELF};
    use std::mem;

    // SAFETY: getrusage only writes into the zeroed struct we own.
    unsafe {
        let mut usage: rusage = mem::zeroed();
        if getrusage(RUSAGE_SELF, &mut usage) == 0 {
            let cpu_time = usage.ru_utime.tv_sec as f64
                + usage.ru_utime.tv_usec as f64 / 1_000_000.0
                + usage.ru_stime.tv_sec as f64
                + usage.ru_stime.tv_usec as f64 / 1_000_000.0;
            Some(ResourceUsage { cpu_time })
        } else {
            None
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "freebsd")))]
fn get_resource_usage() -> Option<ResourceUsage> {
    None
}

pub(crate) fn format_to_string(fmt: ImageFormat) -> String {
    match fmt {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        ImageFormat::Avif => "avif",
        ImageFormat::Gif => "gif",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        other => other.to_mime_type(),
    }
    .to_string()
}

/// Measures decode -> transform -> encode in milliseconds and fills the
/// CPU and size fields in one place.
struct MetricsRecorder {
    metrics: TransformMetrics,
    start_total: Instant,
    stage_start: Instant,
    usage_start: Option<ResourceUsage>,
}

impl MetricsRecorder {
    fn new(input_size: usize) -> Self {
        let now = Instant::now();
        let metrics = TransformMetrics {
            version: PROCESSING_METRICS_VERSION.to_string(),
            bytes_in: input_size as u64,
            ..TransformMetrics::default()
        };
        Self {
            metrics,
            start_total: now,
            stage_start: now,
            usage_start: get_resource_usage(),
        }
    }

    fn lap_ms(&mut self) -> f64 {
        let ms = self.stage_start.elapsed().as_secs_f64() * 1000.0;
        self.stage_start = Instant::now();
        ms
    }

    fn mark_decode_done(&mut self) {
        self.metrics.decode_ms = self.lap_ms();
    }

    fn mark_transform_done(&mut self) {
        self.metrics.transform_ms = self.lap_ms();
    }

    fn finalize(
        mut self,
        output_len: usize,
        format_in: Option<String>,
        exif_embedded: bool,
        request: &TransformRequest,
    ) -> TransformMetrics {
        self.metrics.encode_ms = self.lap_ms();
        self.metrics.total_ms = self.start_total.elapsed().as_secs_f64() * 1000.0;

        if let (Some(start), Some(end)) = (self.usage_start, get_resource_usage()) {
            self.metrics.cpu_time = (end.cpu_time - start.cpu_time).max(0.0);
        }

        let m = &mut self.metrics;
        m.bytes_out = output_len as u64;
        m.compression_ratio = if m.bytes_in > 0 {
            m.bytes_out as f64 / m.bytes_in as f64
        } else {
            0.0
        };
        m.format_in = format_in;
        m.format_out = request.format.as_str().to_lowercase();
        m.metadata_stripped = !exif_embedded;
        self.metrics
    }
}

/// Output of one pipeline run.
#[derive(Debug, Clone)]
pub struct TransformResult {
    pub data: Vec<u8>,
    pub original_size: usize,
    pub processed_size: usize,
    pub metrics: TransformMetrics,
}

/// One image transformation: owned input plus a fully validated request.
#[derive(Debug)]
pub struct TransformTask {
    source: Source,
    request: TransformRequest,
}

impl TransformTask {
    pub fn new(source: impl Into<Source>, request: TransformRequest) -> Self {
        Self {
            source: source.into(),
            request,
        }
    }

    pub fn request(&self) -> &TransformRequest {
        &self.request
    }

    pub fn compute(&self) -> TaskResult<TransformResult> {
        process_image(self.source.as_bytes(), &self.request)
    }
}

/// Run the whole pipeline on encoded bytes.
///
/// Each stage consumes the previous stage's buffer, so at most one decoded
/// image is alive at a time. Any stage error ends the run.
pub fn process_image(bytes: &[u8], request: &TransformRequest) -> TaskResult<TransformResult> {
    let mut recorder = MetricsRecorder::new(bytes.len());
    let format_in = detect_format(bytes).map(format_to_string);

    let buffer = decode(bytes)?;
    recorder.mark_decode_done();

    let region = select_region(&buffer, request);
    debug!(
        stage = "select",
        x = region.x,
        y = region.y,
        width = region.width,
        height = region.height,
        "region selected"
    );

    let buffer = transform(buffer, region, request)?;
    recorder.mark_transform_done();

    let exif_embedded = exif_to_embed(&buffer, request).is_some();
    let data = encode(&buffer, request)?;
    drop(buffer);

    let metrics = recorder.finalize(data.len(), format_in, exif_embedded, request);
    Ok(TransformResult {
        original_size: bytes.len(),
        processed_size: data.len(),
        data,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorStage;
    use crate::ops::{CropRect, OutputFormat};
    use image::{DynamicImage, GenericImageView, RgbImage};
    use std::io::Cursor;

    fn sample_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        }));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn process_image_outputs_requested_dimensions() {
        let bytes = sample_png_bytes(400, 300);
        let req = TransformRequest::new(100, 75, OutputFormat::Jpeg)
            .with_crop(CropRect::new(50, 50, 200, 150));
        let result = process_image(&bytes, &req).unwrap();

        assert_eq!(result.original_size, bytes.len());
        assert_eq!(result.processed_size, result.data.len());
        let decoded = image::load_from_memory(&result.data).unwrap();
        assert_eq!(decoded.dimensions(), (100, 75));
    }

    #[test]
    fn metrics_are_populated() {
        let bytes = sample_png_bytes(64, 64);
        let req = TransformRequest::new(32, 32, OutputFormat::WebP);
        let metrics = process_image(&bytes, &req).unwrap().metrics;

        assert_eq!(metrics.version, PROCESSING_METRICS_VERSION);
        assert_eq!(metrics.bytes_in, bytes.len() as u64);
        assert!(metrics.bytes_out > 0);
        assert!(metrics.compression_ratio > 0.0);
        assert_eq!(metrics.format_in.as_deref(), Some("png"));
        assert_eq!(metrics.format_out, "webp");
        assert!(metrics.metadata_stripped);
        assert!(metrics.total_ms >= metrics.decode_ms);
    }

    #[test]
    fn keeping_metadata_without_source_exif_reports_stripped() {
        let bytes = sample_png_bytes(32, 32);
        for format in [OutputFormat::Jpeg, OutputFormat::WebP] {
            let req = TransformRequest::new(16, 16, format).with_strip_metadata(false);
            let result = process_image(&bytes, &req).unwrap();
            assert!(result.metrics.metadata_stripped, "{format}");
            assert!(crate::engine::io::extract_exif(&result.data).is_none());
        }
    }

    #[test]
    fn decode_errors_carry_decode_stage() {
        let req = TransformRequest::new(10, 10, OutputFormat::Png);
        let err = process_image(b"definitely not an image", &req).unwrap_err();
        assert_eq!(err.stage(), ErrorStage::Decode);
    }

    #[test]
    fn out_of_bounds_crop_is_transform_error() {
        let bytes = sample_png_bytes(50, 50);
        let req = TransformRequest::new(10, 10, OutputFormat::Png)
            .with_crop(CropRect::new(40, 40, 20, 20));
        let err = process_image(&bytes, &req).unwrap_err();
        assert!(matches!(err, PixelPerfectError::InvalidCropBounds { .. }));
    }

    #[test]
    fn task_runs_from_owned_bytes() {
        let task = TransformTask::new(
            sample_png_bytes(20, 20),
            TransformRequest::new(5, 5, OutputFormat::Png),
        );
        assert_eq!(task.request().format, OutputFormat::Png);
        let result = task.compute().unwrap();
        assert_eq!(&result.data[1..4], b"PNG");
    }
}
