//! Frame encoding.
//!
//! Turns an RGB24 `RawFrame` into a compressed image in the format named by a
//! file extension. JPEG output uses a fixed low quality suited to streaming;
//! lossless formats ignore the quality setting.

use anyhow::{Context, Result};
use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::CaptureError;
use crate::frame::RawFrame;

/// JPEG quality on the 0-100 scale.
pub const JPEG_QUALITY: u8 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeFormat {
    Jpeg,
    Png,
    Bmp,
}

impl EncodeFormat {
    /// Resolve a file extension such as ".jpg" or "PNG".
    pub fn from_extension(file_type: &str) -> Result<Self, CaptureError> {
        let ext = file_type.trim();
        let ext = ext.strip_prefix('.').unwrap_or(ext);
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "jpe" => Ok(EncodeFormat::Jpeg),
            "png" => Ok(EncodeFormat::Png),
            "bmp" => Ok(EncodeFormat::Bmp),
            _ => Err(CaptureError::UnsupportedFormat(file_type.to_string())),
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "image/jpeg",
            EncodeFormat::Png => "image/png",
            EncodeFormat::Bmp => "image/bmp",
        }
    }

    /// Canonical extension, with leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => ".jpg",
            EncodeFormat::Png => ".png",
            EncodeFormat::Bmp => ".bmp",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    format: EncodeFormat,
    quality: u8,
}

impl FrameEncoder {
    pub fn new(format: EncodeFormat) -> Self {
        Self {
            format,
            quality: JPEG_QUALITY,
        }
    }

    pub fn format(&self) -> EncodeFormat {
        self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn encode(&self, frame: &RawFrame) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(frame.byte_len() / 8);
        let (pixels, width, height) = (frame.pixels(), frame.width, frame.height);
        match self.format {
            EncodeFormat::Jpeg => JpegEncoder::new_with_quality(&mut out, self.quality)
                .write_image(pixels, width, height, ExtendedColorType::Rgb8)
                .context("encode jpeg")?,
            EncodeFormat::Png => PngEncoder::new(&mut out)
                .write_image(pixels, width, height, ExtendedColorType::Rgb8)
                .context("encode png")?,
            EncodeFormat::Bmp => BmpEncoder::new(&mut out)
                .write_image(pixels, width, height, ExtendedColorType::Rgb8)
                .context("encode bmp")?,
        }
        Ok(out)
    }
}
