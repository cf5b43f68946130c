//! Error types for the encode pipeline.
//!
//! Every failure a caller can observe travels through [`EncodeError`], whether
//! it was detected while building a request, rejected by the runner, or
//! produced on the background thread. Decoding problems (used for previews and
//! round-trip verification) are reported separately through [`DecodeError`].

use serde::Serialize;
use thiserror::Error;

use crate::codec::CodecId;

/// Errors produced while configuring, scheduling or running an encode.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncodeError {
    /// An option is missing, unrecognized or out of range for the codec.
    #[error("Invalid configuration for {codec}: {reason}")]
    InvalidConfiguration { codec: CodecId, reason: String },

    /// The codec itself rejected the input or failed while encoding.
    #[error("{codec} encoding failed: {message}")]
    CodecFailure { codec: CodecId, message: String },

    /// The codec returned zero bytes, so no ratio can be computed.
    #[error("{codec} produced zero-length output")]
    DegenerateOutput { codec: CodecId },

    /// A task is already running on this runner.
    #[error("Encoder is busy: a task is already running")]
    Busy,

    /// The background execution context panicked or could not be started.
    #[error("Background worker failed: {message}")]
    Worker { message: String },
}

impl EncodeError {
    pub fn invalid_configuration(codec: CodecId, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            codec,
            reason: reason.into(),
        }
    }

    pub fn codec_failure(codec: CodecId, message: impl Into<String>) -> Self {
        Self::CodecFailure {
            codec,
            message: message.into(),
        }
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Whether resubmitting (possibly with a corrected configuration) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EncodeError::InvalidConfiguration { .. } | EncodeError::Busy
        )
    }
}

/// Errors that can occur while decoding compressed bytes back into a raster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The bytes are not in the codec's format.
    #[error("Invalid or unsupported image format")]
    InvalidFormat,

    /// The stream is truncated or internally inconsistent.
    #[error("Corrupted or incomplete image data: {0}")]
    CorruptedData(String),

    /// The stream is valid but uses a feature this decoder does not implement.
    #[error("Unsupported stream feature: {0}")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_codec() {
        let err = EncodeError::invalid_configuration(CodecId::Png, "compressLevel out of range");
        let msg = err.to_string();
        assert!(msg.contains("PNG"));
        assert!(msg.contains("compressLevel out of range"));

        let err = EncodeError::DegenerateOutput {
            codec: CodecId::LosslessNearJpeg,
        };
        assert!(err.to_string().contains("JPEG-LS"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(EncodeError::Busy.is_retryable());
        assert!(EncodeError::invalid_configuration(CodecId::Png, "x").is_retryable());
        assert!(!EncodeError::codec_failure(CodecId::Png, "x").is_retryable());
        assert!(!EncodeError::worker("panic").is_retryable());
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(EncodeError::Busy).unwrap();
        assert_eq!(json["kind"], "busy");

        let json =
            serde_json::to_value(EncodeError::codec_failure(CodecId::Png, "boom")).unwrap();
        assert_eq!(json["kind"], "codec_failure");
        assert_eq!(json["codec"], "PNG");
        assert_eq!(json["message"], "boom");
    }
}
