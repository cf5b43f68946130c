//! Raster buffers handed to the encode pipeline.
//!
//! A [`RasterBuffer`] is decoded pixel data plus its geometry. Pixel storage is
//! reference counted and never mutated, so cloning a buffer into an
//! [`EncodeRequest`](crate::EncodeRequest) snapshots it: later transforms of the
//! caller's working image produce new buffers instead of touching the one an
//! in-flight task is reading.

use std::fmt;
use std::sync::Arc;

use image::{DynamicImage, ExtendedColorType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when constructing a raster buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RasterError {
    /// Width or height is zero
    #[error("Invalid dimensions: width ({width}) and height ({height}) must be non-zero")]
    InvalidDimensions { width: u32, height: u32 },

    /// Pixel data length doesn't match the dimensions and format
    #[error("Invalid pixel data: expected {expected} bytes for {format}, got {actual}")]
    InvalidPixelData {
        expected: usize,
        actual: usize,
        format: PixelFormat,
    },
}

/// Interleaved 8-bit pixel layouts supported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// One luminance sample per pixel.
    Gray8,
    /// Red, green, blue.
    Rgb8,
    /// Red, green, blue, alpha.
    Rgba8,
}

impl PixelFormat {
    /// Number of samples per pixel.
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    /// Bytes per pixel; every channel is one byte.
    pub fn bytes_per_pixel(self) -> usize {
        self.channels()
    }

    /// Format with the given sample count, if supported.
    pub fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            1 => Some(PixelFormat::Gray8),
            3 => Some(PixelFormat::Rgb8),
            4 => Some(PixelFormat::Rgba8),
            _ => None,
        }
    }

    /// The matching color type for the `image` crate's encoders.
    pub fn color_type(self) -> ExtendedColorType {
        match self {
            PixelFormat::Gray8 => ExtendedColorType::L8,
            PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
            PixelFormat::Rgba8 => ExtendedColorType::Rgba8,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Gray8 => "Gray8",
            PixelFormat::Rgb8 => "Rgb8",
            PixelFormat::Rgba8 => "Rgba8",
        };
        f.write_str(name)
    }
}

/// Immutable decoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Row-major, interleaved samples. Length is width * height * channels.
    pixels: Arc<[u8]>,
}

impl RasterBuffer {
    /// Create a buffer, checking that the pixel data matches the geometry.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: impl Into<Arc<[u8]>>,
    ) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidDimensions { width, height });
        }

        let pixels = pixels.into();
        let expected = (width as usize) * (height as usize) * format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(RasterError::InvalidPixelData {
                expected,
                actual: pixels.len(),
                format,
            });
        }

        Ok(Self {
            width,
            height,
            format,
            pixels,
        })
    }

    /// Create a buffer from any image, converting it to the nearest supported
    /// 8-bit layout.
    pub fn from_dynamic_image(img: DynamicImage) -> Self {
        let (width, height, format, pixels) = match img {
            DynamicImage::ImageLuma8(buf) => {
                (buf.width(), buf.height(), PixelFormat::Gray8, buf.into_raw())
            }
            DynamicImage::ImageRgb8(buf) => {
                (buf.width(), buf.height(), PixelFormat::Rgb8, buf.into_raw())
            }
            DynamicImage::ImageRgba8(buf) => {
                (buf.width(), buf.height(), PixelFormat::Rgba8, buf.into_raw())
            }
            other => {
                let color = other.color();
                if color.has_alpha() {
                    let buf = other.into_rgba8();
                    (buf.width(), buf.height(), PixelFormat::Rgba8, buf.into_raw())
                } else if color.has_color() {
                    let buf = other.into_rgb8();
                    (buf.width(), buf.height(), PixelFormat::Rgb8, buf.into_raw())
                } else {
                    let buf = other.into_luma8();
                    (buf.width(), buf.height(), PixelFormat::Gray8, buf.into_raw())
                }
            }
        };

        Self {
            width,
            height,
            format,
            pixels: pixels.into(),
        }
    }

    /// Convert to an `image::DynamicImage` for saving or display.
    pub fn to_dynamic_image(&self) -> Option<DynamicImage> {
        let raw = self.pixels.to_vec();
        match self.format {
            PixelFormat::Gray8 => {
                image::GrayImage::from_raw(self.width, self.height, raw).map(DynamicImage::ImageLuma8)
            }
            PixelFormat::Rgb8 => {
                image::RgbImage::from_raw(self.width, self.height, raw).map(DynamicImage::ImageRgb8)
            }
            PixelFormat::Rgba8 => image::RgbaImage::from_raw(self.width, self.height, raw)
                .map(DynamicImage::ImageRgba8),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Interleaved sample data.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Get the total number of pixels.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Byte length of the canonical uncompressed serialization: packed,
    /// interleaved samples with no header or row padding.
    pub fn canonical_size(&self) -> u64 {
        self.pixel_count() * self.format.bytes_per_pixel() as u64
    }

    /// Samples of row `y`.
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * self.format.bytes_per_pixel();
        let start = y as usize * stride;
        &self.pixels[start..start + stride]
    }

    /// Whether both buffers share the same allocation.
    pub fn shares_pixels_with(&self, other: &RasterBuffer) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    /// Return a copy rotated by `quarter_turns` * 90 degrees clockwise.
    ///
    /// Negative values rotate counter-clockwise. The receiver is left untouched.
    pub fn rotated(&self, quarter_turns: i32) -> Self {
        let turns = quarter_turns.rem_euclid(4);
        if turns == 0 {
            return self.clone();
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let bpp = self.format.bytes_per_pixel();
        let (out_w, out_h) = if turns % 2 == 1 { (h, w) } else { (w, h) };
        let mut out = vec![0u8; self.pixels.len()];

        for y in 0..h {
            for x in 0..w {
                let (dx, dy) = match turns {
                    1 => (h - 1 - y, x),
                    2 => (w - 1 - x, h - 1 - y),
                    _ => (y, w - 1 - x),
                };
                let src = (y * w + x) * bpp;
                let dst = (dy * out_w + dx) * bpp;
                out[dst..dst + bpp].copy_from_slice(&self.pixels[src..src + bpp]);
            }
        }

        Self {
            width: out_w as u32,
            height: out_h as u32,
            format: self.format,
            pixels: out.into(),
        }
    }
}
