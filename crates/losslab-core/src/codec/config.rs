//! Codec configuration values.
//!
//! A [`Configuration`] is an immutable map of named options. It is built once
//! by the caller, validated by the chosen codec when the request is created,
//! and moved into the background task; the caller keeps no handle through
//! which it could change the options an in-flight encode reads.
//!
//! Codecs read typed views out of it ([`PngOptions`], [`JpeglsOptions`]), which
//! is where unknown keys, wrong value types and out-of-range values are
//! rejected.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CodecId;
use crate::error::EncodeError;

/// PNG zlib effort, 0 (fastest) to 9 (smallest).
pub const COMPRESS_LEVEL: &str = "compressLevel";

/// JPEG-LS sample interleaving: `none`, `line` or `sample`.
pub const INTERLEAVE_MODE: &str = "interleaveMode";

/// A single option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Int(i64),
    Text(String),
}

impl OptionValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(v) => Some(*v),
            OptionValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            OptionValue::Int(_) => None,
            OptionValue::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{v}"),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(i64::from(value))
    }
}

impl From<u8> for OptionValue {
    fn from(value: u8) -> Self {
        OptionValue::Int(i64::from(value))
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

impl From<InterleaveMode> for OptionValue {
    fn from(value: InterleaveMode) -> Self {
        OptionValue::Text(value.as_str().to_string())
    }
}

/// Errors from parsing `key=value` option text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigParseError {
    #[error("Expected key=value, got '{0}'")]
    MissingSeparator(String),

    #[error("Empty option key in '{0}'")]
    EmptyKey(String),
}

/// Named codec options. Keys iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    entries: BTreeMap<String, OptionValue>,
}

impl Configuration {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a configuration with `key` set to `value`, replacing any
    /// previous value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse one `key=value` pair. Integer text becomes [`OptionValue::Int`].
    pub fn parse_pair(text: &str) -> Result<(String, OptionValue), ConfigParseError> {
        let (key, value) = text
            .split_once('=')
            .ok_or_else(|| ConfigParseError::MissingSeparator(text.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigParseError::EmptyKey(text.to_string()));
        }

        let value = value.trim();
        let value = match value.parse::<i64>() {
            Ok(v) => OptionValue::Int(v),
            Err(_) => OptionValue::Text(value.to_string()),
        };
        Ok((key.to_string(), value))
    }
}

/// Parses comma-separated pairs: `compressLevel=9` or `a=1,b=line`.
impl FromStr for Configuration {
    type Err = ConfigParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Configuration::new(), |config, part| {
                let (key, value) = Configuration::parse_pair(part)?;
                Ok(config.with(key, value))
            })
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Sample ordering for the JPEG-LS codec. Affects byte layout, never pixel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterleaveMode {
    /// One scan per component.
    None,
    /// One scan; each line holds every component's samples in turn.
    #[default]
    Line,
    /// One scan; components interleaved pixel by pixel.
    Sample,
}

impl InterleaveMode {
    pub const ALL: [InterleaveMode; 3] = [
        InterleaveMode::None,
        InterleaveMode::Line,
        InterleaveMode::Sample,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InterleaveMode::None => "none",
            InterleaveMode::Line => "line",
            InterleaveMode::Sample => "sample",
        }
    }

    /// The ILV value carried in a JPEG-LS scan header.
    pub fn ilv(self) -> u8 {
        match self {
            InterleaveMode::None => 0,
            InterleaveMode::Line => 1,
            InterleaveMode::Sample => 2,
        }
    }

    pub fn from_ilv(value: u8) -> Option<Self> {
        match value {
            0 => Some(InterleaveMode::None),
            1 => Some(InterleaveMode::Line),
            2 => Some(InterleaveMode::Sample),
            _ => None,
        }
    }
}

impl fmt::Display for InterleaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterleaveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InterleaveMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown interleave mode '{s}' (expected none, line or sample)"))
    }
}

/// Typed PNG options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngOptions {
    pub compress_level: u8,
}

impl PngOptions {
    pub const KEYS: &'static [&'static str] = &[COMPRESS_LEVEL];
    pub const MAX_LEVEL: u8 = 9;
    pub const DEFAULT_LEVEL: u8 = 6;

    /// Read and validate PNG options.
    pub fn from_configuration(configuration: &Configuration) -> Result<Self, EncodeError> {
        let codec = CodecId::Png;
        reject_unknown_keys(codec, configuration, Self::KEYS)?;

        let value = require(codec, configuration, COMPRESS_LEVEL)?;
        let level = value.as_int().ok_or_else(|| {
            EncodeError::invalid_configuration(
                codec,
                format!("{COMPRESS_LEVEL} must be an integer, got '{value}'"),
            )
        })?;

        if !(0..=i64::from(Self::MAX_LEVEL)).contains(&level) {
            return Err(EncodeError::invalid_configuration(
                codec,
                format!("{COMPRESS_LEVEL} must be in 0..={}, got {level}", Self::MAX_LEVEL),
            ));
        }

        Ok(Self {
            compress_level: level as u8,
        })
    }

    pub fn to_configuration(self) -> Configuration {
        Configuration::new().with(COMPRESS_LEVEL, self.compress_level)
    }
}

impl Default for PngOptions {
    fn default() -> Self {
        Self {
            compress_level: Self::DEFAULT_LEVEL,
        }
    }
}

/// Typed JPEG-LS options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JpeglsOptions {
    pub interleave: InterleaveMode,
}

impl JpeglsOptions {
    pub const KEYS: &'static [&'static str] = &[INTERLEAVE_MODE];

    /// Read and validate JPEG-LS options.
    pub fn from_configuration(configuration: &Configuration) -> Result<Self, EncodeError> {
        let codec = CodecId::LosslessNearJpeg;
        reject_unknown_keys(codec, configuration, Self::KEYS)?;

        let value = require(codec, configuration, INTERLEAVE_MODE)?;
        let text = value.as_text().ok_or_else(|| {
            EncodeError::invalid_configuration(
                codec,
                format!("{INTERLEAVE_MODE} must be text, got {value}"),
            )
        })?;
        let interleave = text.parse::<InterleaveMode>().map_err(|reason| {
            EncodeError::invalid_configuration(codec, format!("{INTERLEAVE_MODE}: {reason}"))
        })?;

        Ok(Self { interleave })
    }

    pub fn to_configuration(self) -> Configuration {
        Configuration::new().with(INTERLEAVE_MODE, self.interleave)
    }
}

fn reject_unknown_keys(
    codec: CodecId,
    configuration: &Configuration,
    known: &[&str],
) -> Result<(), EncodeError> {
    match configuration.keys().find(|key| !known.contains(key)) {
        Some(key) => Err(EncodeError::invalid_configuration(
            codec,
            format!("unrecognized option '{key}' (expected {})", known.join(", ")),
        )),
        None => Ok(()),
    }
}

fn require<'a>(
    codec: CodecId,
    configuration: &'a Configuration,
    key: &str,
) -> Result<&'a OptionValue, EncodeError> {
    configuration
        .get(key)
        .ok_or_else(|| EncodeError::invalid_configuration(codec, format!("missing option '{key}'")))
}
