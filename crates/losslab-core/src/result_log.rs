//! In-memory history of encode outcomes, newest first.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::codec::{CodecId, Configuration};
use crate::error::EncodeError;
use crate::metrics::{serialize_millis, EncodeResult};

/// Summary of a task that ended in failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub task_id: Uuid,
    pub codec: CodecId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub configuration_echo: Configuration,
    pub error: EncodeError,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

/// One recorded outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LogEntry {
    Success(EncodeResult),
    Failure(FailureRecord),
}

impl LogEntry {
    pub fn task_id(&self) -> Uuid {
        match self {
            LogEntry::Success(r) => r.task_id,
            LogEntry::Failure(f) => f.task_id,
        }
    }

    pub fn codec(&self) -> CodecId {
        match self {
            LogEntry::Success(r) => r.codec,
            LogEntry::Failure(f) => f.codec,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            LogEntry::Success(r) => r.label.as_deref(),
            LogEntry::Failure(f) => f.label.as_deref(),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        match self {
            LogEntry::Success(r) => &r.configuration_echo,
            LogEntry::Failure(f) => &f.configuration_echo,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            LogEntry::Success(r) => r.metrics.elapsed(),
            LogEntry::Failure(f) => f.elapsed,
        }
    }

    pub fn as_success(&self) -> Option<&EncodeResult> {
        match self {
            LogEntry::Success(r) => Some(r),
            LogEntry::Failure(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.as_success().is_some()
    }
}

impl From<EncodeResult> for LogEntry {
    fn from(result: EncodeResult) -> Self {
        LogEntry::Success(result)
    }
}

impl From<FailureRecord> for LogEntry {
    fn from(record: FailureRecord) -> Self {
        LogEntry::Failure(record)
    }
}

/// Append-only log. Iteration yields the most recent entry first.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ResultLog {
    entries: VecDeque<LogEntry>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome ahead of every earlier one.
    pub fn append(&mut self, entry: impl Into<LogEntry>) {
        self.entries.push_front(entry.into());
    }

    /// Entries, newest first. Each call starts a fresh pass.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> + ExactSizeIterator + Clone {
        self.entries.iter()
    }

    /// Successful entries only, newest first.
    pub fn successes(&self) -> impl Iterator<Item = &EncodeResult> + Clone {
        self.entries.iter().filter_map(LogEntry::as_success)
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a ResultLog {
    type Item = &'a LogEntry;
    type IntoIter = std::collections::vec_deque::Iter<'a, LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
