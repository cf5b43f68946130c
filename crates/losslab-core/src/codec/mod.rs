//! Codec capability and the closed set of supported codecs.
//!
//! The pipeline never branches on the codec itself: a [`CodecId`] is resolved
//! to a [`Codec`] once, when the request is built, and the task only calls
//! through the trait.
//!
//! # Codecs
//!
//! - [`PngCodec`] - PNG through the `image` crate, `compressLevel` 0-9
//! - [`JpeglsCodec`] - lossless JPEG-LS (LOCO-I), `interleaveMode` none/line/sample

mod config;
pub mod jpegls;
mod png;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use config::{
    ConfigParseError, Configuration, InterleaveMode, JpeglsOptions, OptionValue, PngOptions,
    COMPRESS_LEVEL, INTERLEAVE_MODE,
};
pub use jpegls::JpeglsCodec;
pub use self::png::PngCodec;

use crate::error::{DecodeError, EncodeError};
use crate::raster::RasterBuffer;

/// Identifies one of the supported codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecId {
    #[serde(rename = "PNG")]
    Png,
    /// JPEG-LS, a lossless near-JPEG codec with selectable interleaving.
    #[serde(rename = "LOSSLESS_NEAR_JPEG")]
    LosslessNearJpeg,
}

impl CodecId {
    pub const ALL: [CodecId; 2] = [CodecId::Png, CodecId::LosslessNearJpeg];

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Png => "PNG",
            CodecId::LosslessNearJpeg => "JPEG-LS",
        }
    }

    /// File extension for encoded output.
    pub fn extension(self) -> &'static str {
        match self {
            CodecId::Png => "png",
            CodecId::LosslessNearJpeg => "jls",
        }
    }

    /// A configuration that this codec always accepts.
    pub fn default_configuration(self) -> Configuration {
        match self {
            CodecId::Png => PngOptions::default().to_configuration(),
            CodecId::LosslessNearJpeg => JpeglsOptions::default().to_configuration(),
        }
    }

    /// Resolve the identifier to its implementation.
    pub fn codec(self) -> Arc<dyn Codec> {
        codec_for(self)
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for an unrecognized codec name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown codec '{0}' (expected png or jpegls)")]
pub struct UnknownCodec(pub String);

impl FromStr for CodecId {
    type Err = UnknownCodec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(CodecId::Png),
            "jpegls" | "jpeg-ls" | "jls" | "lossless-near-jpeg" | "lossless_near_jpeg" => {
                Ok(CodecId::LosslessNearJpeg)
            }
            _ => Err(UnknownCodec(s.to_string())),
        }
    }
}

/// A stateless lossless codec.
///
/// Implementations must be deterministic: identical buffer and configuration
/// produce byte-identical output. They must not keep a reference to the buffer
/// after `encode` returns.
pub trait Codec: Send + Sync {
    /// Identifier reported in results and errors.
    fn id(&self) -> CodecId;

    /// Option keys this codec recognizes.
    fn option_keys(&self) -> &'static [&'static str];

    /// Check `configuration` without encoding anything.
    fn validate(&self, configuration: &Configuration) -> Result<(), EncodeError>;

    /// Encode `buffer`. Validates `configuration` before touching pixels.
    fn encode(
        &self,
        buffer: &RasterBuffer,
        configuration: &Configuration,
    ) -> Result<Vec<u8>, EncodeError>;

    /// Decode bytes produced by `encode` back to pixels.
    fn decode(&self, bytes: &[u8]) -> Result<RasterBuffer, DecodeError>;

    /// Every distinct valid configuration, in ascending effort order.
    fn configurations(&self) -> Vec<Configuration>;
}

/// Look up the implementation for `id`.
pub fn codec_for(id: CodecId) -> Arc<dyn Codec> {
    match id {
        CodecId::Png => Arc::new(PngCodec),
        CodecId::LosslessNearJpeg => Arc::new(JpeglsCodec),
    }
}
