use clap::Parser;
use pixelperfect::engine::Source;
use pixelperfect::error::{ErrorStage, PixelPerfectError};
use pixelperfect::validate::{sniff_content_type, RawTransformParams, UploadLimits};
use pixelperfect::TransformTask;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pixelperfect")]
#[command(about = "Resize, crop, sharpen and re-encode an image")]
#[command(version)]
struct Cli {
    /// Input image (JPEG, PNG, WebP, AVIF or GIF)
    input: PathBuf,

    /// Output file [default: ./resized_image.<ext>]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target width in pixels (1-10000)
    #[arg(long, allow_negative_numbers = true)]
    width: i64,

    /// Target height in pixels (1-10000)
    #[arg(long, allow_negative_numbers = true)]
    height: i64,

    /// Output format: JPEG, PNG, WEBP or AVIF
    #[arg(short, long, default_value = "JPEG")]
    format: String,

    /// Compression quality (1-100), ignored for PNG
    #[arg(short, long, default_value_t = 80, allow_negative_numbers = true)]
    quality: i64,

    /// Carry EXIF from the source into JPEG/WebP output
    #[arg(long)]
    keep_metadata: bool,

    /// Apply an unsharp mask after resizing
    #[arg(long)]
    sharpen: bool,

    /// Crop the center to the target aspect ratio before resizing
    #[arg(long)]
    center_crop: bool,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    crop_x: i64,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    crop_y: i64,

    /// Explicit crop width; requires --crop-height
    #[arg(long, allow_negative_numbers = true)]
    crop_width: Option<i64>,

    /// Explicit crop height; requires --crop-width
    #[arg(long, allow_negative_numbers = true)]
    crop_height: Option<i64>,

    /// Content type of the input; sniffed from magic bytes when omitted
    #[arg(long)]
    content_type: Option<String>,

    /// Use the strict upload limits (16 MiB, 4096 px targets, no GIF)
    #[arg(long)]
    strict: bool,

    /// Print run metrics as JSON on stdout
    #[arg(long)]
    metrics: bool,
}

impl Cli {
    fn params(&self) -> RawTransformParams {
        RawTransformParams {
            width: Some(self.width),
            height: Some(self.height),
            format: self.format.clone(),
            quality: self.quality,
            strip_metadata: !self.keep_metadata,
            smart_sharpen: self.sharpen,
            center_crop: self.center_crop,
            crop_x: self.crop_x,
            crop_y: self.crop_y,
            crop_width: self.crop_width,
            crop_height: self.crop_height,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn run(cli: &Cli) -> Result<(), PixelPerfectError> {
    let limits = if cli.strict {
        UploadLimits::strict()
    } else {
        UploadLimits::default()
    };

    let source = Source::open(&cli.input)?;
    limits.enforce_source_len(source.len())?;
    let content_type = match cli.content_type.as_deref() {
        Some(ct) => ct,
        None => sniff_content_type(source.as_bytes()).unwrap_or("application/octet-stream"),
    };
    limits.enforce_content_type(content_type)?;

    let request = cli.params().validate(&limits)?;
    info!(
        "Processing image: {}, {}x{}, {}, quality={}",
        file_name(&cli.input),
        request.width,
        request.height,
        request.format,
        request.quality
    );

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(request.format.download_filename()));

    let result = TransformTask::new(source, request).compute()?;
    std::fs::write(&output, &result.data)
        .map_err(|e| PixelPerfectError::file_write_failed(output.to_string_lossy().into_owned(), e))?;

    info!(
        "Image processed successfully: original={}B, processed={}B, time={}",
        result.original_size,
        result.processed_size,
        result.metrics.processing_time_display()
    );

    if cli.metrics {
        let json = serde_json::to_string_pretty(&result.metrics).map_err(|e| {
            PixelPerfectError::internal_panic(format!("failed to serialize metrics: {e}"))
        })?;
        println!("{json}");
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.stage() {
                ErrorStage::Validation => {
                    error!(stage = "validation", "Validation failed: {err}");
                    eprintln!("error: {}", err.client_message());
                }
                // Local file errors are printed in full.
                ErrorStage::Io => eprintln!("error: {err}"),
                stage => {
                    error!(stage = stage.as_str(), "Failed to process image: {err}");
                    eprintln!("error: {}", err.client_message());
                }
            }
            ExitCode::FAILURE
        }
    }
}
