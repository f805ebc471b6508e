//! Decoding, resampling and JPEG re-encoding of uploaded photos.
//!
//! Every stored blob is a JPEG, whatever format was uploaded. Resizing never
//! enlarges: a target larger than the current image in either dimension is
//! rejected before any pixels are touched.

use image::{
    DynamicImage, ImageFormat,
    codecs::jpeg::JpegEncoder,
    imageops::FilterType,
};
use std::io::Cursor;
use thiserror::Error;

pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unsupported image format")]
    UnsupportedFormat,
    #[error("cannot upscale {from_width}x{from_height} to {to_width}x{to_height}")]
    UpscaleNotAllowed {
        from_width: u32,
        from_height: u32,
        to_width: u32,
        to_height: u32,
    },
    #[error("invalid target dimensions {0}x{1}")]
    InvalidDimensions(u32, u32),
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

pub type ImageResult<T> = Result<T, ImageError>;

/// Detect the MIME type of `data` from its leading magic bytes.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    image::guess_format(data).ok().map(|format| format.to_mime_type())
}

/// A decoded photo being worked on by a single request.
pub struct Image {
    pixels: DynamicImage,
    source_format: ImageFormat,
}

impl Image {
    /// Decode a JPEG or PNG byte stream.
    pub fn decode(data: &[u8]) -> ImageResult<Self> {
        let source_format = match image::guess_format(data) {
            Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png)) => format,
            _ => return Err(ImageError::UnsupportedFormat),
        };
        let pixels = image::load_from_memory_with_format(data, source_format)
            .map_err(ImageError::Decode)?;
        Ok(Self {
            pixels,
            source_format,
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn source_format(&self) -> ImageFormat {
        self.source_format
    }

    fn ensure_no_upscale(&self, width: u32, height: u32) -> ImageResult<()> {
        if width == 0 || height == 0 {
            return Err(ImageError::InvalidDimensions(width, height));
        }
        if width > self.width() || height > self.height() {
            return Err(ImageError::UpscaleNotAllowed {
                from_width: self.width(),
                from_height: self.height(),
                to_width: width,
                to_height: height,
            });
        }
        Ok(())
    }

    /// Scale to exactly `width`x`height` with Lanczos3, ignoring aspect ratio.
    pub fn resize(&mut self, width: u32, height: u32) -> ImageResult<()> {
        self.ensure_no_upscale(width, height)?;
        if (width, height) != (self.width(), self.height()) {
            self.pixels = self.pixels.resize_exact(width, height, FilterType::Lanczos3);
        }
        Ok(())
    }

    /// Scale down preserving aspect ratio so the result fits inside
    /// `max_width`x`max_height`, with the limiting side equal to its bound.
    pub fn resize_to_fit(&mut self, max_width: u32, max_height: u32) -> ImageResult<()> {
        self.ensure_no_upscale(max_width, max_height)?;
        let (width, height) = fit_dimensions(self.width(), self.height(), max_width, max_height);
        self.resize(width, height)
    }

    /// Encode as baseline JPEG. Alpha is dropped.
    pub fn encode_jpeg(&self, quality: u8) -> ImageResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        self.pixels
            .to_rgb8()
            .write_with_encoder(encoder)
            .map_err(ImageError::Encode)?;
        Ok(buf.into_inner())
    }
}

/// Aspect-preserving fit of `width`x`height` into `max_width`x`max_height`.
///
/// Compares `max_width / width` against `max_height / height` in integer
/// space; the smaller ratio is the limiting side and lands on its bound, the
/// other side is rounded to nearest and kept within `1..=bound`.
fn fit_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let (w, h) = (u64::from(width), u64::from(height));
    let (mw, mh) = (u64::from(max_width), u64::from(max_height));

    if mw * h <= mh * w {
        let scaled = ((h * mw + w / 2) / w).clamp(1, mh);
        (max_width, scaled as u32)
    } else {
        let scaled = ((w * mh + h / 2) / h).clamp(1, mw);
        (scaled as u32, max_height)
    }
}
