//! Losslab Core - lossless encode-and-measure pipeline
//!
//! This crate encodes decoded images with a selectable lossless codec on a
//! background thread and reports what each encode cost: size before and after,
//! compression ratio and time spent in the codec.
//!
//! # Flow
//!
//! 1. Build a [`RasterBuffer`] (or convert one from `image::DynamicImage`).
//! 2. Build an [`EncodeRequest`] for a [`CodecId`] and a [`Configuration`];
//!    invalid options are rejected here.
//! 3. [`TaskRunner::submit`] the request and collect the [`Completion`] later.
//! 4. Append completions to a [`ResultLog`], which lists the newest first.

pub mod codec;
pub mod error;
pub mod metrics;
pub mod raster;
pub mod result_log;
pub mod runner;
pub mod task;

pub use codec::{
    codec_for, Codec, CodecId, Configuration, InterleaveMode, JpeglsCodec, JpeglsOptions,
    OptionValue, PngCodec, PngOptions, COMPRESS_LEVEL, INTERLEAVE_MODE,
};
pub use error::{DecodeError, EncodeError};
pub use metrics::{EncodeMetrics, EncodeResult};
pub use raster::{PixelFormat, RasterBuffer, RasterError};
pub use result_log::{FailureRecord, LogEntry, ResultLog};
pub use runner::{Completion, TaskHandle, TaskRunner};
pub use task::{EncodeRequest, EncodeTask, TaskState};
