// src/engine/buffer.rs
//
// PixelBuffer: the single owned image value that moves through the pipeline.
// Each stage takes the buffer by value and hands back a derived one, so one
// invocation never holds two decoded buffers at once.

use image::{DynamicImage, ImageFormat};

/// Source color mode, as reported by the decoder.
///
/// `Palette` only appears straight out of the decoder (indexed PNG, GIF);
/// pixels are already expanded to RGB/RGBA by then and every later stage
/// reports the mode of the expanded pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorMode {
    L,
    La,
    Rgb,
    Rgba,
    Palette,
}

impl ColorMode {
    /// Mode of already-expanded pixels.
    pub fn of(img: &DynamicImage) -> Self {
        match img {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => ColorMode::L,
            DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => ColorMode::La,
            DynamicImage::ImageRgba8(_)
            | DynamicImage::ImageRgba16(_)
            | DynamicImage::ImageRgba32F(_) => ColorMode::Rgba,
            _ if img.color().has_alpha() => ColorMode::Rgba,
            _ => ColorMode::Rgb,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::L => "L",
            ColorMode::La => "LA",
            ColorMode::Rgb => "RGB",
            ColorMode::Rgba => "RGBA",
            ColorMode::Palette => "P",
        }
    }

    /// Modes that must be flattened onto white before JPEG encoding.
    pub fn needs_flatten_for_jpeg(&self) -> bool {
        matches!(self, ColorMode::Rgba | ColorMode::La | ColorMode::Palette)
    }
}

/// Decoded pixels plus what the decoder learned about the source.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    image: DynamicImage,
    mode: ColorMode,
    exif: Option<Vec<u8>>,
    source_format: Option<ImageFormat>,
}

impl PixelBuffer {
    pub fn new(image: DynamicImage) -> Self {
        let mode = ColorMode::of(&image);
        Self {
            image,
            mode,
            exif: None,
            source_format: None,
        }
    }

    /// Override the mode, used by decoders that know the container was indexed.
    pub fn with_mode(mut self, mode: ColorMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_exif(mut self, exif: Option<Vec<u8>>) -> Self {
        self.exif = exif.filter(|blob| !blob.is_empty());
        self
    }

    pub fn with_source_format(mut self, format: Option<ImageFormat>) -> Self {
        self.source_format = format;
        self
    }

    /// Replace the pixels, keeping metadata. The mode is recomputed from the new pixels.
    pub fn map_image<F>(self, f: F) -> Self
    where
        F: FnOnce(DynamicImage) -> DynamicImage,
    {
        let image = f(self.image);
        Self {
            mode: ColorMode::of(&image),
            image,
            exif: self.exif,
            source_format: self.source_format,
        }
    }

    /// Fallible [`map_image`](Self::map_image).
    pub fn try_map_image<F, E>(self, f: F) -> Result<Self, E>
    where
        F: FnOnce(DynamicImage) -> Result<DynamicImage, E>,
    {
        let Self {
            image,
            exif,
            source_format,
            ..
        } = self;
        let image = f(image)?;
        Ok(Self {
            mode: ColorMode::of(&image),
            image,
            exif,
            source_format,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    /// Raw EXIF (TIFF) blob carried from the source, if any.
    pub fn exif(&self) -> Option<&[u8]> {
        self.exif.as_deref()
    }

    pub fn source_format(&self) -> Option<ImageFormat> {
        self.source_format
    }
}
