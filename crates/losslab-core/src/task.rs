//! Encode requests and the task state machine.
//!
//! An [`EncodeRequest`] is validated when it is built and never changes
//! afterwards. An [`EncodeTask`] runs one request through its codec exactly
//! once:
//!
//! ```text
//! Created -> Running -> Completed
//!                    \-> Failed
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::codec::{codec_for, Codec, CodecId, Configuration};
use crate::error::EncodeError;
use crate::metrics::{EncodeMetrics, EncodeResult};
use crate::raster::RasterBuffer;

/// Lifecycle of an [`EncodeTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Created,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    /// Completed and Failed are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// One validated unit of work: a source snapshot, a codec and its options.
#[derive(Clone)]
pub struct EncodeRequest {
    source: RasterBuffer,
    codec: Arc<dyn Codec>,
    configuration: Configuration,
    label: Option<String>,
}

impl EncodeRequest {
    /// Build a request for a registered codec.
    ///
    /// Fails with [`EncodeError::InvalidConfiguration`] if the codec rejects
    /// `configuration`; nothing is encoded in that case.
    pub fn new(
        source: RasterBuffer,
        codec: CodecId,
        configuration: Configuration,
    ) -> Result<Self, EncodeError> {
        Self::with_codec(source, codec_for(codec), configuration)
    }

    /// Build a request for any codec implementation.
    pub fn with_codec(
        source: RasterBuffer,
        codec: Arc<dyn Codec>,
        configuration: Configuration,
    ) -> Result<Self, EncodeError> {
        codec.validate(&configuration)?;
        Ok(Self {
            source,
            codec,
            configuration,
            label: None,
        })
    }

    /// Build a request using the codec's default options.
    pub fn with_defaults(source: RasterBuffer, codec: CodecId) -> Self {
        Self {
            source,
            codec: codec_for(codec),
            configuration: codec.default_configuration(),
            label: None,
        }
    }

    /// Attach a display name, typically the source file name.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn source(&self) -> &RasterBuffer {
        &self.source
    }

    pub fn codec_id(&self) -> CodecId {
        self.codec.id()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl fmt::Debug for EncodeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeRequest")
            .field("width", &self.source.width())
            .field("height", &self.source.height())
            .field("format", &self.source.format())
            .field("codec", &self.codec.id())
            .field("configuration", &self.configuration)
            .field("label", &self.label)
            .finish()
    }
}

/// Runs one [`EncodeRequest`] and records its outcome and timing.
#[derive(Debug)]
pub struct EncodeTask {
    id: Uuid,
    request: EncodeRequest,
    state: TaskState,
    elapsed: Duration,
}

impl EncodeTask {
    pub fn new(request: EncodeRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            state: TaskState::Created,
            elapsed: Duration::ZERO,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn request(&self) -> &EncodeRequest {
        &self.request
    }

    /// Time spent in the codec; zero until the task has run.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Encode the request and derive its metrics.
    ///
    /// A task runs once. Calling `run` again returns [`EncodeError::Worker`]
    /// and leaves the terminal state untouched.
    #[tracing::instrument(
        name = "encode",
        skip(self),
        fields(task_id = %self.id, codec = %self.request.codec.id())
    )]
    pub fn run(&mut self) -> Result<EncodeResult, EncodeError> {
        if self.state != TaskState::Created {
            return Err(EncodeError::worker(format!(
                "task {} cannot run from state {:?}",
                self.id, self.state
            )));
        }
        self.state = TaskState::Running;

        let codec = self.request.codec.id();
        let original_size = self.request.source.canonical_size();

        let start = Instant::now();
        let encoded = self
            .request
            .codec
            .encode(&self.request.source, &self.request.configuration);
        self.elapsed = start.elapsed();

        let outcome = encoded.and_then(|bytes| {
            let metrics =
                EncodeMetrics::measure(original_size, bytes.len() as u64, self.elapsed, codec)?;
            Ok(EncodeResult {
                task_id: self.id,
                codec,
                label: self.request.label.clone(),
                metrics,
                compressed_bytes: bytes.into(),
                configuration_echo: self.request.configuration.clone(),
            })
        });

        self.state = match outcome {
            Ok(_) => TaskState::Completed,
            Err(_) => TaskState::Failed,
        };
        outcome
    }
}
