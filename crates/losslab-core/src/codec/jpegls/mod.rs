//! Lossless JPEG-LS (ITU-T T.87) encoding and decoding.
//!
//! This is a native implementation of the LOCO-I algorithm for 8-bit samples
//! with default coding parameters and NEAR = 0. Gray, RGB and RGBA buffers
//! are supported; each channel is coded as an independent component.
//!
//! `interleaveMode` chooses the scan layout:
//!
//! - `none` - one scan per component
//! - `line` - one scan, lines of each component in turn
//! - `sample` - one scan, components interleaved per pixel
//!
//! The layout changes the byte stream, never the decoded pixels. A
//! single-component image always uses one non-interleaved scan.

mod bitstream;
mod context;
mod markers;
mod scan;

use self::bitstream::{BitReader, BitWriter, StreamError};
use self::markers::{FrameHeader, MarkerReader, Segment};
use self::scan::{code_scan, ScanGeometry};
use super::{Codec, CodecId, Configuration, InterleaveMode, JpeglsOptions};
use crate::error::{DecodeError, EncodeError};
use crate::raster::{PixelFormat, RasterBuffer};

/// Largest width or height a frame header can carry.
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

/// Largest pixel buffer the decoder allocates for one frame.
pub const MAX_DECODED_BYTES: usize = 1 << 30;

/// JPEG-LS codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpeglsCodec;

impl Codec for JpeglsCodec {
    fn id(&self) -> CodecId {
        CodecId::LosslessNearJpeg
    }

    fn option_keys(&self) -> &'static [&'static str] {
        JpeglsOptions::KEYS
    }

    fn validate(&self, configuration: &Configuration) -> Result<(), EncodeError> {
        JpeglsOptions::from_configuration(configuration).map(|_| ())
    }

    fn encode(
        &self,
        buffer: &RasterBuffer,
        configuration: &Configuration,
    ) -> Result<Vec<u8>, EncodeError> {
        let options = JpeglsOptions::from_configuration(configuration)?;
        encode_jpegls(buffer, options)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RasterBuffer, DecodeError> {
        decode_jpegls(bytes)
    }

    fn configurations(&self) -> Vec<Configuration> {
        InterleaveMode::ALL
            .into_iter()
            .map(|interleave| JpeglsOptions { interleave }.to_configuration())
            .collect()
    }
}

/// Encode a raster buffer to a JPEG-LS stream.
pub fn encode_jpegls(
    buffer: &RasterBuffer,
    options: JpeglsOptions,
) -> Result<Vec<u8>, EncodeError> {
    let codec = CodecId::LosslessNearJpeg;
    let too_large = || {
        EncodeError::codec_failure(
            codec,
            format!(
                "{}x{} exceeds the {MAX_DIMENSION} pixel frame limit",
                buffer.width(),
                buffer.height()
            ),
        )
    };
    let width = u16::try_from(buffer.width()).map_err(|_| too_large())?;
    let height = u16::try_from(buffer.height()).map_err(|_| too_large())?;

    let channels = buffer.format().channels();
    let mode = if channels == 1 {
        InterleaveMode::None
    } else {
        options.interleave
    };
    let scans: Vec<Vec<usize>> = match mode {
        InterleaveMode::None => (0..channels).map(|c| vec![c]).collect(),
        InterleaveMode::Line | InterleaveMode::Sample => vec![(0..channels).collect()],
    };
    tracing::trace!(%mode, scans = scans.len(), "encoding JPEG-LS");

    let mut out = Vec::with_capacity(buffer.pixels().len() / 2 + 64);
    markers::write_start_of_image(&mut out);
    markers::write_frame_header(&mut out, width, height, channels as u8);

    for components in scans {
        markers::write_scan_header(&mut out, &components, mode);
        let geometry = ScanGeometry {
            width: usize::from(width),
            height: usize::from(height),
            components,
            mode,
        };

        let mut writer = BitWriter::with_capacity(buffer.pixels().len() / 2);
        code_scan(
            &mut writer,
            &geometry,
            |y, channel, line| {
                let row = buffer.row(y as u32);
                for (slot, pixel) in line.iter_mut().zip(row.chunks_exact(channels)) {
                    *slot = i32::from(pixel[channel]);
                }
            },
            |_, _, _| {},
        )
        .map_err(|e| EncodeError::codec_failure(codec, e.to_string()))?;
        out.extend_from_slice(&writer.finish());
    }

    markers::write_end_of_image(&mut out);
    Ok(out)
}

/// Decode a lossless 8-bit JPEG-LS stream.
pub fn decode_jpegls(bytes: &[u8]) -> Result<RasterBuffer, DecodeError> {
    let mut reader = MarkerReader::new(bytes)?;
    let mut frame = None;
    let mut pixels = Vec::new();
    let mut decoded = Vec::new();

    loop {
        match reader.next_segment()? {
            Segment::Frame(header) => {
                pixels = allocate_frame(&header, bytes.len())?;
                decoded = vec![false; header.component_ids.len()];
                frame = Some(header);
            }
            Segment::Scan(scan) => {
                let Some(header) = frame.as_ref() else {
                    return Err(DecodeError::CorruptedData("scan before frame header".into()));
                };
                let channels = header.component_ids.len();
                let width = header.width as usize;
                let geometry = ScanGeometry {
                    width,
                    height: header.height as usize,
                    components: scan.components.clone(),
                    mode: scan.mode,
                };

                let mut bits = BitReader::new(reader.scan_data());
                code_scan(&mut bits, &geometry, |_, _, _| {}, |y, channel, line| {
                    let row = &mut pixels[y * width * channels..(y + 1) * width * channels];
                    for (pixel, &sample) in row.chunks_exact_mut(channels).zip(line) {
                        pixel[channel] = sample as u8;
                    }
                })
                .map_err(corrupted)?;
                reader.finish_scan(bits.position())?;

                for channel in scan.components {
                    decoded[channel] = true;
                }
            }
            Segment::End => break,
        }
    }

    let header = frame.ok_or_else(|| DecodeError::CorruptedData("missing frame header".into()))?;
    if decoded.iter().any(|done| !done) {
        return Err(DecodeError::CorruptedData("component without a scan".into()));
    }
    let format = PixelFormat::from_channels(header.component_ids.len())
        .ok_or_else(|| DecodeError::Unsupported("component count".into()))?;

    RasterBuffer::new(header.width, header.height, format, pixels)
        .map_err(|e| DecodeError::CorruptedData(e.to_string()))
}

/// Zeroed pixel storage for a frame whose size is checked against the stream
/// first. Every coded line costs at least one bit.
fn allocate_frame(header: &FrameHeader, stream_len: usize) -> Result<Vec<u8>, DecodeError> {
    if header.height as usize > stream_len.saturating_mul(8) {
        return Err(DecodeError::CorruptedData(format!(
            "{} lines cannot fit in a {stream_len}-byte stream",
            header.height
        )));
    }
    let size = header.width as usize * header.height as usize * header.component_ids.len();
    if size > MAX_DECODED_BYTES {
        return Err(DecodeError::Unsupported(format!(
            "{}x{} frame needs {size} bytes",
            header.width, header.height
        )));
    }

    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(size)
        .map_err(|e| DecodeError::Unsupported(format!("frame buffer: {e}")))?;
    pixels.resize(size, 0);
    Ok(pixels)
}

fn corrupted(err: StreamError) -> DecodeError {
    DecodeError::CorruptedData(err.to_string())
}


// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn mode_strategy() -> impl Strategy<Value = InterleaveMode> {
        prop_oneof![
            Just(InterleaveMode::None),
            Just(InterleaveMode::Line),
            Just(InterleaveMode::Sample),
        ]
    }

    /// Small rasters whose samples come from a narrow palette, so runs and
    /// regular mode are both exercised.
    fn raster_strategy() -> impl Strategy<Value = RasterBuffer> {
        let format = prop_oneof![
            Just(PixelFormat::Gray8),
            Just(PixelFormat::Rgb8),
            Just(PixelFormat::Rgba8),
        ];
        (1u32..=20, 1u32..=20, format, any::<bool>()).prop_flat_map(|(w, h, format, flat)| {
            let size = (w * h) as usize * format.bytes_per_pixel();
            let sample = if flat {
                prop_oneof![Just(0u8), Just(1u8), Just(255u8)].boxed()
            } else {
                any::<u8>().boxed()
            };
            prop::collection::vec(sample, size..=size)
                .prop_map(move |pixels| RasterBuffer::new(w, h, format, pixels).unwrap())
        })
    }

    proptest! {
        /// Property: decoding reproduces the source pixels exactly.
        #[test]
        fn prop_round_trip_is_lossless(buf in raster_strategy(), mode in mode_strategy()) {
            let bytes = encode_jpegls(&buf, JpeglsOptions { interleave: mode }).unwrap();
            prop_assert_eq!(decode_jpegls(&bytes).unwrap(), buf);
        }

        /// Property: Same input always produces same output (deterministic).
        #[test]
        fn prop_deterministic_output(buf in raster_strategy(), mode in mode_strategy()) {
            let options = JpeglsOptions { interleave: mode };
            prop_assert_eq!(
                encode_jpegls(&buf, options).unwrap(),
                encode_jpegls(&buf, options).unwrap()
            );
        }

        /// Property: a cut-off stream is reported as an error, never a panic.
        #[test]
        fn prop_truncated_stream_is_an_error(
            buf in raster_strategy(),
            mode in mode_strategy(),
            cut in any::<prop::sample::Index>(),
        ) {
            let bytes = encode_jpegls(&buf, JpeglsOptions { interleave: mode }).unwrap();
            let end = cut.index(bytes.len() - 1);
            prop_assert!(decode_jpegls(&bytes[..end]).is_err());
        }
    }
}
