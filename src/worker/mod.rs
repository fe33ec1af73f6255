//! Worker protocol: off-thread execution with a fixed event surface.
//!
//! A worker runs one long operation and streams tagged events over a
//! channel: `Started`, any number of `Progress` events with monotonically
//! non-decreasing percent, then exactly one of `Finished` or `Error`.
//! Cancellation is cooperative: `cancel()` sets a shared flag that the
//! operation observes at its checkpoints.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::asr::types::TranscriptionResult;
use crate::asr::Transcriber;
use crate::batch::{BatchItemStatus, BatchOptions, BatchProcessor, BatchResult};
use crate::diarization::{DiarizationResult, Diarizer};
use crate::error::{Result, TranscriptionError};
use crate::pipeline::{run_full_pipeline, PipelineOptions};

const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Checkpoint: raise `Cancelled` when the flag is set.
    pub fn check(&self) -> std::result::Result<(), TranscriptionError> {
        if self.is_cancelled() {
            Err(TranscriptionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Events emitted by a worker, in happens-before order.
#[derive(Debug, Clone)]
pub enum WorkerEvent<T> {
    Started,
    Progress {
        step: String,
        percent: f32,
        detail: String,
    },
    /// Raw speakerless result, emitted by the full pipeline before the
    /// diarization stage so the shell can render immediately.
    TranscriptionDone(TranscriptionResult),
    /// Per-item completion, emitted by the batch worker.
    ItemCompleted {
        index: usize,
        success: bool,
        message: String,
    },
    /// Batch-shaped progress: item counter plus intra-item percent.
    BatchProgress {
        current: usize,
        total: usize,
        filename: String,
        percent: f32,
    },
    Finished(T),
    Error(String),
}

/// Sending half handed to the running operation. Progress percent is
/// clamped to be monotonically non-decreasing across the run.
pub struct EventSender<T> {
    tx: mpsc::UnboundedSender<WorkerEvent<T>>,
    last_percent: Arc<Mutex<f32>>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            last_percent: self.last_percent.clone(),
        }
    }
}

impl<T> EventSender<T> {
    fn new(tx: mpsc::UnboundedSender<WorkerEvent<T>>) -> Self {
        Self {
            tx,
            last_percent: Arc::new(Mutex::new(0.0)),
        }
    }

    fn send(&self, event: WorkerEvent<T>) {
        let _ = self.tx.send(event);
    }

    pub fn progress(&self, step: &str, percent: f32, detail: &str) {
        let percent = {
            let mut last = self.last_percent.lock().unwrap();
            let clamped = percent.max(*last).min(100.0);
            *last = clamped;
            clamped
        };
        self.send(WorkerEvent::Progress {
            step: step.to_string(),
            percent,
            detail: detail.to_string(),
        });
    }

    pub fn transcription_done(&self, result: TranscriptionResult) {
        self.send(WorkerEvent::TranscriptionDone(result));
    }

    pub fn item_completed(&self, index: usize, success: bool, message: &str) {
        self.send(WorkerEvent::ItemCompleted {
            index,
            success,
            message: message.to_string(),
        });
    }

    pub fn batch_progress(&self, current: usize, total: usize, filename: &str, percent: f32) {
        self.send(WorkerEvent::BatchProgress {
            current,
            total,
            filename: filename.to_string(),
            percent,
        });
    }
}

/// Handle to a spawned worker: event stream, cancellation and stop.
pub struct WorkerHandle<T> {
    events: mpsc::UnboundedReceiver<WorkerEvent<T>>,
    cancel: CancelToken,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl<T> WorkerHandle<T> {
    /// Next event, or `None` once the worker is done and drained.
    pub async fn next_event(&mut self) -> Option<WorkerEvent<T>> {
        self.events.recv().await
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cancel and join the worker task, bounded at 5 seconds.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            let abort = join.abort_handle();
            if tokio::time::timeout(WORKER_JOIN_TIMEOUT, join).await.is_err() {
                warn!("worker did not stop within 5s, aborting");
                abort.abort();
            }
        }
    }
}

/// Spawn a worker around an async operation.
///
/// Emits `Started`, runs the operation, then exactly one of `Finished`
/// or `Error`; the error branch carries the user-facing translation.
pub fn spawn_worker<T, F, Fut>(label: &'static str, run: F) -> WorkerHandle<T>
where
    T: Send + 'static,
    F: FnOnce(EventSender<T>, CancelToken) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T>> + Send + 'static,
{
    let cancel = CancelToken::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let events = EventSender::new(tx);
    let task_cancel = cancel.clone();

    let join = tokio::spawn(async move {
        events.send(WorkerEvent::Started);
        match run(events.clone(), task_cancel).await {
            Ok(value) => events.send(WorkerEvent::Finished(value)),
            Err(err) => {
                if !err.is_cancelled() {
                    error!("{label} worker failed: {err}");
                }
                events.send(WorkerEvent::Error(err.user_message()));
            }
        }
    });

    WorkerHandle {
        events: rx,
        cancel,
        join: Some(join),
    }
}

/// Transcription-only worker.
pub fn spawn_transcription_worker(
    transcriber: Arc<tokio::sync::Mutex<Transcriber>>,
    audio_path: PathBuf,
    language: Option<String>,
) -> WorkerHandle<TranscriptionResult> {
    spawn_worker("transcription", move |events, cancel| async move {
        let mut transcriber = transcriber.lock().await;

        events.progress("Initialization", 0.0, "Loading model...");
        let load_events = events.clone();
        transcriber
            .load(Some(&move |msg: &str, pct: f32| {
                load_events.progress("Model", pct * 0.2, msg);
            }))
            .await?;
        cancel.check()?;

        events.progress("Transcription", 20.0, "Starting...");
        let segment_events = events.clone();
        let result = transcriber
            .transcribe(
                &audio_path,
                language.as_deref(),
                Some(&move |index: usize, text: &str| {
                    let percent = (20.0 + index as f32 * 2.0).min(95.0);
                    segment_events.progress("Transcription", percent, text);
                }),
                &cancel,
            )
            .await?;

        events.progress(
            "Done",
            100.0,
            &format!("{} segments transcribed", result.segments.len()),
        );
        Ok(result)
    })
}

/// Diarization-only worker.
pub fn spawn_diarization_worker(
    diarizer: Arc<tokio::sync::Mutex<Diarizer>>,
    audio_path: PathBuf,
    min_speakers: Option<usize>,
    max_speakers: Option<usize>,
) -> WorkerHandle<DiarizationResult> {
    spawn_worker("diarization", move |events, cancel| async move {
        let mut diarizer = diarizer.lock().await;

        events.progress("Initialization", 0.0, "Loading diarization model...");
        let diar_events = events.clone();
        let result = diarizer
            .diarize(
                &audio_path,
                min_speakers,
                max_speakers,
                Some(&move |msg: &str, pct: f32| {
                    diar_events.progress("Diarization", pct, msg);
                }),
            )
            .await?;
        cancel.check()?;

        events.progress(
            "Done",
            100.0,
            &format!("{} speakers identified", result.speaker_count),
        );
        Ok(result)
    })
}

/// Full transcription-with-diarization pipeline worker.
pub fn spawn_pipeline_worker(
    transcriber: Arc<tokio::sync::Mutex<Transcriber>>,
    diarizer: Arc<tokio::sync::Mutex<Diarizer>>,
    audio_path: PathBuf,
    options: PipelineOptions,
) -> WorkerHandle<TranscriptionResult> {
    spawn_worker("pipeline", move |events, cancel| async move {
        let mut transcriber = transcriber.lock().await;
        let mut diarizer = diarizer.lock().await;
        run_full_pipeline(
            &mut transcriber,
            &mut diarizer,
            &audio_path,
            &options,
            &events,
            &cancel,
        )
        .await
    })
}

/// Batch worker over an ordered file list.
pub fn spawn_batch_worker(
    transcriber: Arc<tokio::sync::Mutex<Transcriber>>,
    diarizer: Option<Arc<tokio::sync::Mutex<Diarizer>>>,
    files: Vec<PathBuf>,
    options: BatchOptions,
) -> WorkerHandle<BatchResult> {
    spawn_worker("batch", move |events, cancel| async move {
        let mut transcriber = transcriber.lock().await;
        let mut diarizer_guard = match &diarizer {
            Some(diarizer) => Some(diarizer.lock().await),
            None => None,
        };

        let mut processor = BatchProcessor::new(
            &mut transcriber,
            diarizer_guard.as_deref_mut(),
            cancel.clone(),
        );

        let progress_events = events.clone();
        let item_events = events.clone();
        let result = processor
            .process(
                &files,
                &options,
                Some(&move |current, total, filename: &str, percent| {
                    progress_events.batch_progress(current, total, filename, percent);
                }),
                Some(&move |index, item: &crate::batch::BatchItem| {
                    let message = match &item.error {
                        Some(error) => error.clone(),
                        None => format!("{:?}", item.status).to_lowercase(),
                    };
                    item_events.item_completed(
                        index,
                        item.status == BatchItemStatus::Completed,
                        &message,
                    );
                }),
            )
            .await;

        events.progress(
            "Done",
            100.0,
            &format!(
                "{}/{} completed, {} failed",
                result.completed_count(),
                result.total_count(),
                result.failed_count()
            ),
        );
        Ok(result)
    })
}
