//! Size and timing figures for a finished encode.

use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::codec::{CodecId, Configuration};
use crate::error::{DecodeError, EncodeError};
use crate::raster::RasterBuffer;

/// Serialize a duration as fractional milliseconds.
pub(crate) fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_nanos() as f64 / 1_000_000.0)
}

/// Measured outcome of one successful encode.
///
/// Only [`EncodeMetrics::measure`] builds these, so `compressed_size` is always
/// non-zero and the ratio is always finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EncodeMetrics {
    original_size: u64,
    compressed_size: u64,
    ratio: f64,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    elapsed: Duration,
}

impl EncodeMetrics {
    /// Derive metrics from the raw and compressed sizes.
    ///
    /// Fails with [`EncodeError::DegenerateOutput`] when `compressed_size` is 0.
    pub fn measure(
        original_size: u64,
        compressed_size: u64,
        elapsed: Duration,
        codec: CodecId,
    ) -> Result<Self, EncodeError> {
        if compressed_size == 0 {
            return Err(EncodeError::DegenerateOutput { codec });
        }

        Ok(Self {
            original_size,
            compressed_size,
            ratio: original_size as f64 / compressed_size as f64,
            elapsed,
        })
    }

    /// Canonical uncompressed size of the source buffer.
    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// `original_size / compressed_size` at full precision.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Ratio rounded to 4 decimal places.
    pub fn display_ratio(&self) -> f64 {
        (self.ratio * 10_000.0).round() / 10_000.0
    }

    /// Fraction of the original size saved; negative when the output grew.
    pub fn space_saving(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        1.0 - self.compressed_size as f64 / self.original_size as f64
    }

    /// Wall-clock time spent inside the codec.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// A successful encode: metrics, output bytes and the options that produced them.
#[derive(Debug, Clone, Serialize)]
pub struct EncodeResult {
    pub task_id: Uuid,
    pub codec: CodecId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub metrics: EncodeMetrics,
    #[serde(skip)]
    pub compressed_bytes: Arc<[u8]>,
    pub configuration_echo: Configuration,
}

impl EncodeResult {
    /// Decode the compressed bytes back to pixels for display or verification.
    pub fn decode_preview(&self) -> Result<RasterBuffer, DecodeError> {
        self.codec.codec().decode(&self.compressed_bytes)
    }

    /// Size in bytes of the compressed output.
    pub fn len(&self) -> usize {
        self.compressed_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compressed_bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_ratio() {
        let m = EncodeMetrics::measure(30_000, 7_000, Duration::from_millis(12), CodecId::Png)
            .unwrap();
        assert_eq!(m.original_size(), 30_000);
        assert_eq!(m.compressed_size(), 7_000);
        assert!((m.ratio() - 30_000.0 / 7_000.0).abs() < 1e-12);
        assert_eq!(m.display_ratio(), 4.2857);
        assert!((m.space_saving() - (1.0 - 7_000.0 / 30_000.0)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_output_is_degenerate() {
        let err = EncodeMetrics::measure(100, 0, Duration::ZERO, CodecId::LosslessNearJpeg)
            .unwrap_err();
        assert_eq!(
            err,
            EncodeError::DegenerateOutput {
                codec: CodecId::LosslessNearJpeg
            }
        );
    }

    #[test]
    fn test_expansion_has_negative_saving() {
        let m = EncodeMetrics::measure(10, 40, Duration::ZERO, CodecId::Png).unwrap();
        assert!(m.ratio() < 1.0);
        assert!(m.space_saving() < 0.0);
    }

    #[test]
    fn test_serializes_elapsed_as_millis() {
        let m = EncodeMetrics::measure(8, 4, Duration::from_micros(1500), CodecId::Png).unwrap();
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(json["original_size"], 8);
        assert_eq!(json["ratio"], 2.0);
        assert_eq!(json["elapsed_ms"], 1.5);
    }

    #[test]
    fn test_result_json_skips_bytes() {
        let result = EncodeResult {
            task_id: Uuid::nil(),
            codec: CodecId::Png,
            label: None,
            metrics: EncodeMetrics::measure(8, 4, Duration::ZERO, CodecId::Png).unwrap(),
            compressed_bytes: Arc::from(vec![1u8, 2, 3, 4]),
            configuration_echo: CodecId::Png.default_configuration(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("compressed_bytes").is_none());
        assert!(json.get("label").is_none());
        assert_eq!(json["codec"], "PNG");
        assert_eq!(json["configuration_echo"]["compressLevel"], 6);
        assert_eq!(result.len(), 4);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================
