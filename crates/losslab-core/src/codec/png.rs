//! PNG encoding and decoding.
//!
//! This module wraps the `image` crate's PNG encoder. `compressLevel` selects a
//! zlib effort and row filter pair; higher levels never ask for less effort
//! than lower ones.

use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageFormat};

use super::{Codec, CodecId, Configuration, PngOptions};
use crate::error::{DecodeError, EncodeError};
use crate::raster::RasterBuffer;

/// PNG codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

impl Codec for PngCodec {
    fn id(&self) -> CodecId {
        CodecId::Png
    }

    fn option_keys(&self) -> &'static [&'static str] {
        PngOptions::KEYS
    }

    fn validate(&self, configuration: &Configuration) -> Result<(), EncodeError> {
        PngOptions::from_configuration(configuration).map(|_| ())
    }

    fn encode(
        &self,
        buffer: &RasterBuffer,
        configuration: &Configuration,
    ) -> Result<Vec<u8>, EncodeError> {
        let options = PngOptions::from_configuration(configuration)?;
        encode_png(buffer, options)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RasterBuffer, DecodeError> {
        decode_png(bytes)
    }

    fn configurations(&self) -> Vec<Configuration> {
        (0..=PngOptions::MAX_LEVEL)
            .map(|compress_level| PngOptions { compress_level }.to_configuration())
            .collect()
    }
}

/// Map a 0-9 level onto the encoder's deflate effort and filter strategy.
fn encoder_settings(level: u8) -> (CompressionType, FilterType) {
    match level {
        0 => (CompressionType::Fast, FilterType::NoFilter),
        1..=3 => (CompressionType::Fast, FilterType::Adaptive),
        4..=6 => (CompressionType::Default, FilterType::Adaptive),
        _ => (CompressionType::Best, FilterType::Adaptive),
    }
}

/// Encode a raster buffer to PNG bytes.
pub fn encode_png(buffer: &RasterBuffer, options: PngOptions) -> Result<Vec<u8>, EncodeError> {
    let (compression, filter) = encoder_settings(options.compress_level);

    let mut output = Cursor::new(Vec::new());
    let encoder = PngEncoder::new_with_quality(&mut output, compression, filter);

    encoder
        .write_image(
            buffer.pixels(),
            buffer.width(),
            buffer.height(),
            buffer.format().color_type(),
        )
        .map_err(|e| EncodeError::codec_failure(CodecId::Png, e.to_string()))?;

    Ok(output.into_inner())
}

/// Decode PNG bytes.
pub fn decode_png(bytes: &[u8]) -> Result<RasterBuffer, DecodeError> {
    if !bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Err(DecodeError::InvalidFormat);
    }

    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(|e| DecodeError::CorruptedData(e.to_string()))?;

    Ok(RasterBuffer::from_dynamic_image(img))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::COMPRESS_LEVEL;
    use crate::raster::PixelFormat;

    const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

    fn gradient(width: u32, height: u32) -> RasterBuffer {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push((x * 255 / width) as u8);
                pixels.push((y * 255 / height) as u8);
                pixels.push(128u8);
            }
        }
        RasterBuffer::new(width, height, PixelFormat::Rgb8, pixels).unwrap()
    }

    fn level(compress_level: u8) -> Configuration {
        Configuration::new().with(COMPRESS_LEVEL, compress_level)
    }

    #[test]
    fn test_encode_png_basic() {
        let buf = gradient(100, 100);
        let bytes = PngCodec.encode(&buf, &level(6)).unwrap();
        assert_eq!(&bytes[..8], PNG_SIGNATURE);
        // IEND chunk closes the stream
        assert_eq!(&bytes[bytes.len() - 8..bytes.len() - 4], b"IEND");
    }

    #[test]
    fn test_level_nine_compresses_gradient() {
        let buf = gradient(100, 100);
        assert_eq!(buf.canonical_size(), 30_000);

        let bytes = PngCodec.encode(&buf, &level(9)).unwrap();
        assert!(!bytes.is_empty());
        assert!((bytes.len() as u64) < 30_000);
    }

    #[test]
    fn test_higher_level_is_not_larger_on_smooth_content() {
        let buf = gradient(64, 64);
        let fastest = PngCodec.encode(&buf, &level(0)).unwrap();
        let smallest = PngCodec.encode(&buf, &level(9)).unwrap();
        assert!(smallest.len() <= fastest.len());
    }

    #[test]
    fn test_rejects_invalid_level_before_encoding() {
        let buf = gradient(10, 10);
        let err = PngCodec.encode(&buf, &level(15)).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_round_trip_all_formats() {
        let formats = [PixelFormat::Gray8, PixelFormat::Rgb8, PixelFormat::Rgba8];
        for format in formats {
            let len = 17 * 9 * format.bytes_per_pixel();
            let pixels: Vec<u8> = (0..len).map(|i| ((i * 37) % 256) as u8).collect();
            let buf = RasterBuffer::new(17, 9, format, pixels).unwrap();

            let bytes = PngCodec.encode(&buf, &level(4)).unwrap();
            let decoded = PngCodec.decode(&bytes).unwrap();
            assert_eq!(decoded, buf, "{format} should round-trip");
        }
    }

    #[test]
    fn test_decode_rejects_foreign_bytes() {
        assert_eq!(PngCodec.decode(&[0xFF, 0xD8, 0xFF]), Err(DecodeError::InvalidFormat));

        let buf = gradient(8, 8);
        let bytes = PngCodec.encode(&buf, &level(1)).unwrap();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(
            PngCodec.decode(truncated),
            Err(DecodeError::CorruptedData(_))
        ));
    }

    #[test]
    fn test_single_pixel() {
        let buf = RasterBuffer::new(1, 1, PixelFormat::Rgb8, vec![255u8, 0, 0]).unwrap();
        let bytes = PngCodec.encode(&buf, &level(9)).unwrap();
        assert_eq!(PngCodec.decode(&bytes).unwrap(), buf);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================
