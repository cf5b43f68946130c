//! Single-flight background execution of encode tasks.
//!
//! A [`TaskRunner`] runs at most one [`EncodeTask`] at a time on a dedicated
//! thread. `submit` never blocks on the encode: it claims the runner, spawns
//! the thread and returns a [`TaskHandle`]. The outcome comes back as a
//! [`Completion`] on a channel the caller drains from its own thread with
//! [`TaskRunner::try_next`], [`TaskRunner::next_timeout`] or
//! [`TaskRunner::wait`].
//!
//! A second `submit` while a task is running fails with
//! [`EncodeError::Busy`]; nothing is queued. Background threads are always
//! joined, either when the next task is submitted or when the runner shuts
//! down.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use uuid::Uuid;

use crate::codec::{CodecId, Configuration};
use crate::error::EncodeError;
use crate::metrics::EncodeResult;
use crate::result_log::{FailureRecord, LogEntry};
use crate::task::{EncodeRequest, EncodeTask, TaskState};

/// Identifies an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub id: Uuid,
    pub codec: CodecId,
}

/// Outcome of one accepted submission, delivered exactly once.
#[derive(Debug, Clone)]
pub struct Completion {
    pub handle: TaskHandle,
    pub label: Option<String>,
    pub configuration: Configuration,
    pub elapsed: Duration,
    pub outcome: Result<EncodeResult, EncodeError>,
}

impl Completion {
    /// Terminal state the task reached.
    pub fn state(&self) -> TaskState {
        match self.outcome {
            Ok(_) => TaskState::Completed,
            Err(_) => TaskState::Failed,
        }
    }

    /// Convert into a [`ResultLog`](crate::ResultLog) entry.
    pub fn into_entry(self) -> LogEntry {
        match self.outcome {
            Ok(result) => LogEntry::Success(result),
            Err(error) => LogEntry::Failure(FailureRecord {
                task_id: self.handle.id,
                codec: self.handle.codec,
                label: self.label,
                configuration_echo: self.configuration,
                error,
                elapsed: self.elapsed,
            }),
        }
    }
}

impl From<Completion> for LogEntry {
    fn from(completion: Completion) -> Self {
        completion.into_entry()
    }
}

/// Runs encode tasks one at a time on a background thread.
#[derive(Debug)]
pub struct TaskRunner {
    busy: Arc<AtomicBool>,
    /// Accepted submissions whose completion has not been received yet.
    outstanding: AtomicUsize,
    worker: Mutex<Option<JoinHandle<()>>>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl TaskRunner {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            outstanding: AtomicUsize::new(0),
            worker: Mutex::new(None),
            tx,
            rx,
        }
    }

    /// Start `request` in the background.
    ///
    /// Fails with [`EncodeError::Busy`] if a task is running, or with
    /// [`EncodeError::Worker`] if the thread cannot be spawned. In both cases
    /// no completion will be delivered for this call.
    pub fn submit(&self, request: EncodeRequest) -> Result<TaskHandle, EncodeError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(codec = %request.codec_id(), "submission rejected, runner busy");
            return Err(EncodeError::Busy);
        }

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        // The previous thread cleared `busy`, so it is at most finishing its send.
        if let Some(previous) = worker.take() {
            if previous.join().is_err() {
                tracing::warn!("previous encode thread terminated abnormally");
            }
        }

        let task = EncodeTask::new(request);
        let handle = TaskHandle {
            id: task.id(),
            codec: task.request().codec_id(),
        };

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let busy = Arc::clone(&self.busy);
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("losslab-encode-{}", handle.id.simple()))
            .spawn(move || run_in_background(task, busy, tx));

        match spawned {
            Ok(join) => {
                *worker = Some(join);
                tracing::debug!(
                    task_id = %handle.id,
                    codec = %handle.codec,
                    "submission accepted"
                );
                Ok(handle)
            }
            Err(e) => {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                self.busy.store(false, Ordering::Release);
                Err(EncodeError::worker(format!(
                    "could not start encode thread: {e}"
                )))
            }
        }
    }

    /// Whether a task is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Number of accepted submissions not yet received by the caller.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Take a completion if one has arrived.
    pub fn try_next(&self) -> Option<Completion> {
        self.rx.try_recv().ok().map(|c| self.received(c))
    }

    /// Wait up to `timeout` for a completion.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Completion> {
        self.rx.recv_timeout(timeout).ok().map(|c| self.received(c))
    }

    /// Block until the next completion. Returns `None` immediately when no
    /// submission is outstanding.
    pub fn wait(&self) -> Option<Completion> {
        if self.outstanding() == 0 {
            return None;
        }
        self.rx.recv().ok().map(|c| self.received(c))
    }

    /// Join the background thread, if any. Undelivered completions stay
    /// available to `try_next`.
    pub fn shutdown(&self) {
        let previous = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            if previous.join().is_err() {
                tracing::warn!("encode thread terminated abnormally");
            }
        }
    }

    fn received(&self, completion: Completion) -> Completion {
        // Saturating: a completion can only be received once per increment.
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        completion
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_in_background(mut task: EncodeTask, busy: Arc<AtomicBool>, tx: Sender<Completion>) {
    let handle = TaskHandle {
        id: task.id(),
        codec: task.request().codec_id(),
    };
    let label = task.request().label().map(str::to_string);
    let configuration = task.request().configuration().clone();

    let started = Instant::now();
    let (outcome, elapsed) = match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(outcome) => (outcome, task.elapsed()),
        Err(payload) => (
            Err(EncodeError::worker(panic_message(payload.as_ref()))),
            started.elapsed(),
        ),
    };

    match &outcome {
        Ok(result) => tracing::info!(
            task_id = %handle.id,
            codec = %handle.codec,
            original_size = result.metrics.original_size(),
            compressed_size = result.metrics.compressed_size(),
            ratio = result.metrics.display_ratio(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "encode completed"
        ),
        Err(error) => tracing::warn!(
            task_id = %handle.id,
            codec = %handle.codec,
            %error,
            "encode failed"
        ),
    }

    let completion = Completion {
        handle,
        label,
        configuration,
        elapsed,
        outcome,
    };

    busy.store(false, Ordering::Release);
    // The runner owns the receiver and joins this thread before dropping it.
    let _ = tx.send(completion);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("encode panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{InterleaveMode, JpeglsOptions, PngOptions, COMPRESS_LEVEL};
    use crate::raster::{PixelFormat, RasterBuffer};
    use crate::task::test_support::{gray, Gate, Gated, Scripted};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn gated_request(gate: &Arc<Gate>) -> EncodeRequest {
        let codec = Arc::new(Gated(Arc::clone(gate)));
        EncodeRequest::with_codec(gray(4, 4), codec, Configuration::new()).unwrap()
    }

    #[test]
    fn test_submit_and_receive() {
        let runner = TaskRunner::new();
        let request = EncodeRequest::with_defaults(gray(16, 16), CodecId::Png).with_label("a.png");
        let handle = runner.submit(request).unwrap();

        let completion = runner.next_timeout(TIMEOUT).unwrap();
        assert_eq!(completion.handle, handle);
        assert_eq!(completion.state(), TaskState::Completed);
        assert_eq!(completion.label.as_deref(), Some("a.png"));

        let result = completion.outcome.unwrap();
        assert_eq!(result.task_id, handle.id);
        assert!(result.metrics.compressed_size() > 0);
        assert_eq!(runner.outstanding(), 0);
        assert!(runner.wait().is_none());
    }

    #[test]
    fn test_back_to_back_submission_is_busy() {
        let runner = TaskRunner::new();
        let gate = Arc::new(Gate::default());
        let first = runner.submit(gated_request(&gate)).unwrap();
        assert!(runner.is_busy());

        let second = runner.submit(EncodeRequest::with_defaults(gray(2, 2), CodecId::Png));
        assert_eq!(second.unwrap_err(), EncodeError::Busy);
        // The in-flight task is unaffected
        assert!(runner.is_busy());
        assert_eq!(runner.outstanding(), 1);

        gate.release();
        let completion = runner.wait().unwrap();
        assert_eq!(completion.handle, first);
        assert!(completion.outcome.is_ok());
        assert!(runner.try_next().is_none());
    }

    #[test]
    fn test_resubmit_after_completion() {
        let runner = TaskRunner::new();
        let source = gray(12, 7);
        for mode in InterleaveMode::ALL {
            let config = JpeglsOptions { interleave: mode }.to_configuration();
            let request =
                EncodeRequest::new(source.clone(), CodecId::LosslessNearJpeg, config).unwrap();
            let handle = runner.submit(request).unwrap();
            let completion = runner.wait().unwrap();
            assert_eq!(completion.handle, handle);
            let result = completion.outcome.unwrap();
            assert_eq!(result.decode_preview().unwrap(), source, "{mode}");
        }
    }

    #[test]
    fn test_invalid_configuration_starts_nothing() {
        let runner = TaskRunner::new();
        let config = Configuration::new().with(COMPRESS_LEVEL, 15);
        let err = EncodeRequest::new(gray(4, 4), CodecId::Png, config).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidConfiguration { .. }));
        assert!(!runner.is_busy());
        assert_eq!(runner.outstanding(), 0);
        assert!(runner.try_next().is_none());
    }

    #[test]
    fn test_codec_failure_is_delivered() {
        let runner = TaskRunner::new();
        let wide = RasterBuffer::new(70_000, 1, PixelFormat::Gray8, vec![0u8; 70_000]).unwrap();
        let request = EncodeRequest::with_defaults(wide, CodecId::LosslessNearJpeg);
        runner.submit(request).unwrap();

        let completion = runner.wait().unwrap();
        assert_eq!(completion.state(), TaskState::Failed);
        assert!(matches!(
            completion.outcome,
            Err(EncodeError::CodecFailure {
                codec: CodecId::LosslessNearJpeg,
                ..
            })
        ));
    }

    #[test]
    fn test_degenerate_output_is_delivered() {
        let runner = TaskRunner::new();
        let codec = Arc::new(Scripted {
            output: Ok(Vec::new()),
            panics: false,
        });
        let request = EncodeRequest::with_codec(gray(2, 2), codec, Configuration::new()).unwrap();
        runner.submit(request).unwrap();

        let entry = runner.wait().unwrap().into_entry();
        match entry {
            LogEntry::Failure(record) => {
                assert_eq!(record.error, EncodeError::DegenerateOutput { codec: CodecId::Png });
            }
            LogEntry::Success(_) => panic!("empty output must not succeed"),
        }
    }

    #[test]
    fn test_panicking_codec_becomes_worker_error() {
        let runner = TaskRunner::new();
        let codec = Arc::new(Scripted {
            output: Ok(vec![1]),
            panics: true,
        });
        let request = EncodeRequest::with_codec(gray(2, 2), codec, Configuration::new()).unwrap();
        runner.submit(request).unwrap();

        let completion = runner.wait().unwrap();
        match completion.outcome {
            Err(EncodeError::Worker { message }) => assert!(message.contains("scripted codec panic")),
            other => panic!("expected worker error, got {other:?}"),
        }

        // The runner is usable afterwards
        runner
            .submit(EncodeRequest::with_defaults(gray(2, 2), CodecId::Png))
            .unwrap();
        assert!(runner.wait().unwrap().outcome.is_ok());
    }

    #[test]
    fn test_ratio_matches_sizes() {
        let runner = TaskRunner::new();
        for level in 0..=PngOptions::MAX_LEVEL {
            let config = PngOptions { compress_level: level }.to_configuration();
            let request = EncodeRequest::new(gray(40, 30), CodecId::Png, config).unwrap();
            runner.submit(request).unwrap();

            let completion = runner.wait().unwrap();
            let metrics = completion.outcome.unwrap().metrics;
            let expected = metrics.original_size() as f64 / metrics.compressed_size() as f64;
            assert!((metrics.display_ratio() - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn test_shutdown_joins_in_flight_task() {
        let gate = Arc::new(Gate::default());
        let runner = TaskRunner::new();
        runner.submit(gated_request(&gate)).unwrap();

        let releaser = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                gate.release();
            })
        };
        runner.shutdown();
        assert!(!runner.is_busy());
        // The completion survives the join
        assert!(runner.try_next().unwrap().outcome.is_ok());
        releaser.join().unwrap();
    }

    #[test]
    fn test_drop_joins_in_flight_task() {
        let gate = Arc::new(Gate::default());
        let codec = Arc::new(Gated(Arc::clone(&gate)));
        let task_codec = Arc::downgrade(&codec);
        let request = EncodeRequest::with_codec(gray(4, 4), codec, Configuration::new()).unwrap();

        let runner = TaskRunner::new();
        runner.submit(request).unwrap();
        let releaser = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                gate.release();
            })
        };
        drop(runner);
        // The finished task has released the last handle on its codec
        assert!(task_codec.upgrade().is_none());
        releaser.join().unwrap();
    }
}
