//! Batch processing: transcribe many files in sequence.
//!
//! Items are processed one at a time (the underlying models are not
//! reentrant for concurrent calls). Each item is isolated: a failure is
//! recorded on the item and the batch continues. Cancellation fails the
//! current item at its next checkpoint and skips all remaining pending
//! items.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::asr::types::TranscriptionResult;
use crate::asr::Transcriber;
use crate::audio::AudioProcessor;
use crate::diarization::{assign_speakers, Diarizer};
use crate::error::{AudioError, Result};
use crate::worker::CancelToken;

/// Lifecycle state of one batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

/// Output artifacts to write per completed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Txt,
    Srt,
    Both,
}

impl OutputFormat {
    pub fn wants_txt(&self) -> bool {
        matches!(self, OutputFormat::Txt | OutputFormat::Both)
    }

    pub fn wants_srt(&self) -> bool {
        matches!(self, OutputFormat::Srt | OutputFormat::Both)
    }
}

/// Options applied to every item of a batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub language: Option<String>,
    pub use_diarization: bool,
    /// 0 means auto.
    pub min_speakers: usize,
    pub max_speakers: usize,
    /// Defaults to each input's parent directory.
    pub output_dir: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub include_timestamps: bool,
    pub include_speakers: bool,
    /// Skip items whose outputs already exist.
    pub skip_existing: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            language: None,
            use_diarization: true,
            min_speakers: 0,
            max_speakers: 0,
            output_dir: None,
            output_format: OutputFormat::Txt,
            include_timestamps: true,
            include_speakers: true,
            skip_existing: false,
        }
    }
}

/// One file inside a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub path: PathBuf,
    pub status: BatchItemStatus,
    pub result: Option<TranscriptionResult>,
    pub error: Option<String>,
    pub elapsed_seconds: f64,
}

impl BatchItem {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            status: BatchItemStatus::Pending,
            result: None,
            error: None,
            elapsed_seconds: 0.0,
        }
    }

    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Aggregate outcome of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_seconds: f64,
}

impl BatchResult {
    pub fn total_count(&self) -> usize {
        self.items.len()
    }

    pub fn completed_count(&self) -> usize {
        self.count(BatchItemStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(BatchItemStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(BatchItemStatus::Skipped)
    }

    pub fn success_rate(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.completed_count() as f64 / self.items.len() as f64 * 100.0
    }

    fn count(&self, status: BatchItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }
}

/// Batch progress callback: `(current, total, filename, percent)`.
pub type BatchProgressFn = dyn Fn(usize, usize, &str, f32) + Send + Sync;

/// Per-item completion callback with the item's terminal state.
pub type ItemCompletedFn = dyn Fn(usize, &BatchItem) + Send + Sync;

/// Sequential batch processor borrowing the models for the run.
pub struct BatchProcessor<'a> {
    transcriber: &'a mut Transcriber,
    diarizer: Option<&'a mut Diarizer>,
    cancel: CancelToken,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(
        transcriber: &'a mut Transcriber,
        diarizer: Option<&'a mut Diarizer>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            transcriber,
            diarizer,
            cancel,
        }
    }

    /// Process an ordered file list.
    pub async fn process(
        &mut self,
        files: &[PathBuf],
        options: &BatchOptions,
        progress: Option<&BatchProgressFn>,
        on_item: Option<&ItemCompletedFn>,
    ) -> BatchResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut items: Vec<BatchItem> = files.iter().cloned().map(BatchItem::new).collect();
        let total = items.len();

        for index in 0..items.len() {
            if self.cancel.is_cancelled() {
                mark_remaining_skipped(&mut items, index);
                break;
            }

            if let Some(cb) = progress {
                cb(index + 1, total, &items[index].filename(), 0.0);
            }

            self.process_item(&mut items[index], options, progress, index, total)
                .await;

            if let Some(cb) = on_item {
                cb(index, &items[index]);
            }
        }

        let result = BatchResult {
            items,
            started_at,
            finished_at: Utc::now(),
            total_seconds: clock.elapsed().as_secs_f64(),
        };
        info!(
            "Batch finished: {}/{} completed, {} failed, {:.1}s",
            result.completed_count(),
            result.total_count(),
            result.failed_count(),
            result.total_seconds
        );
        result
    }

    async fn process_item(
        &mut self,
        item: &mut BatchItem,
        options: &BatchOptions,
        progress: Option<&BatchProgressFn>,
        index: usize,
        total: usize,
    ) {
        let clock = Instant::now();
        item.status = BatchItemStatus::Processing;

        match self
            .run_item(&item.path.clone(), options, progress, index, total)
            .await
        {
            Ok(Some(result)) => {
                item.result = Some(result);
                item.status = BatchItemStatus::Completed;
            }
            Ok(None) => {
                item.status = BatchItemStatus::Skipped;
                info!("Skipped (output exists): {}", item.filename());
            }
            Err(e) => {
                item.status = BatchItemStatus::Failed;
                item.error = Some(e.to_string());
                error!("Item {} failed: {e}", item.filename());
            }
        }

        item.elapsed_seconds = clock.elapsed().as_secs_f64();
    }

    /// Returns `Ok(None)` when the item was skipped due to existing
    /// outputs.
    async fn run_item(
        &mut self,
        path: &Path,
        options: &BatchOptions,
        progress: Option<&BatchProgressFn>,
        index: usize,
        total: usize,
    ) -> Result<Option<TranscriptionResult>> {
        validate_input(path)?;

        if options.skip_existing && output_exists(path, options) {
            return Ok(None);
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let item_progress = |percent: f32| {
            if let Some(cb) = progress {
                cb(index + 1, total, &filename, percent);
            }
        };

        item_progress(10.0);
        let mut result = self
            .transcriber
            .transcribe(path, options.language.as_deref(), None, &self.cancel)
            .await?;
        item_progress(50.0);

        if options.use_diarization {
            if let Some(diarizer) = self.diarizer.as_deref_mut() {
                let diarization = diarizer
                    .diarize(
                        path,
                        bound(options.min_speakers),
                        bound(options.max_speakers),
                        None,
                    )
                    .await?;
                item_progress(90.0);
                assign_speakers(&mut result, &diarization);
            }
        }
        self.cancel.check()?;

        save_outputs(path, &result, options)?;
        item_progress(100.0);
        Ok(Some(result))
    }
}

fn bound(value: usize) -> Option<usize> {
    if value > 0 {
        Some(value)
    } else {
        None
    }
}

fn validate_input(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(AudioError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    if !AudioProcessor::is_supported(path) {
        return Err(AudioError::Format {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string(),
        }
        .into());
    }
    Ok(())
}

fn output_dir_for(input: &Path, options: &BatchOptions) -> PathBuf {
    options
        .output_dir
        .clone()
        .unwrap_or_else(|| input.parent().unwrap_or_else(|| Path::new(".")).to_path_buf())
}

fn output_exists(input: &Path, options: &BatchOptions) -> bool {
    let dir = output_dir_for(input, options);
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    (options.output_format.wants_txt() && dir.join(format!("{stem}.txt")).exists())
        || (options.output_format.wants_srt() && dir.join(format!("{stem}.srt")).exists())
}

fn save_outputs(input: &Path, result: &TranscriptionResult, options: &BatchOptions) -> Result<()> {
    let dir = output_dir_for(input, options);
    std::fs::create_dir_all(&dir)?;
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if options.output_format.wants_txt() {
        let path = dir.join(format!("{stem}.txt"));
        std::fs::write(
            &path,
            result.to_text(options.include_timestamps, options.include_speakers),
        )?;
        info!("Saved: {}", path.display());
    }
    if options.output_format.wants_srt() {
        let path = dir.join(format!("{stem}.srt"));
        std::fs::write(&path, result.to_srt())?;
        info!("Saved: {}", path.display());
    }
    Ok(())
}

fn mark_remaining_skipped(items: &mut [BatchItem], from: usize) {
    for item in &mut items[from..] {
        if item.status == BatchItemStatus::Pending {
            item.status = BatchItemStatus::Skipped;
        }
    }
}

/// All supported audio files under a directory, name-sorted
/// case-insensitively. `recursive` descends into subdirectories.
pub fn list_audio_files(directory: &Path, recursive: bool) -> Vec<PathBuf> {
    if !directory.is_dir() {
        return Vec::new();
    }

    let mut files = Vec::new();
    collect_audio_files(directory, recursive, &mut files);
    files.sort_by_key(|path| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
    files
}

fn collect_audio_files(directory: &Path, recursive: bool, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect_audio_files(&path, recursive, files);
            }
        } else if AudioProcessor::is_supported(&path) {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_audio_files_sorts_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["Zebra.wav", "alpha.mp3", "Beta.flac", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let sub = dir.path().join("nested");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.ogg"), b"x").unwrap();

        let flat = list_audio_files(dir.path(), false);
        let names: Vec<String> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alpha.mp3", "Beta.flac", "Zebra.wav"]);

        let recursive = list_audio_files(dir.path(), true);
        assert_eq!(recursive.len(), 4);
        assert!(recursive.iter().any(|p| p.ends_with("nested/deep.ogg")));
    }

    #[test]
    fn list_audio_files_on_missing_dir_is_empty() {
        assert!(list_audio_files(Path::new("/nonexistent/batch/dir"), true).is_empty());
    }

    #[test]
    fn output_exists_checks_every_requested_format() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("meeting.wav");
        std::fs::write(&input, b"x").unwrap();

        let mut options = BatchOptions {
            output_format: OutputFormat::Both,
            ..Default::default()
        };
        assert!(!output_exists(&input, &options));

        std::fs::write(dir.path().join("meeting.txt"), b"x").unwrap();
        assert!(output_exists(&input, &options));

        options.output_format = OutputFormat::Srt;
        assert!(!output_exists(&input, &options));
    }

    #[test]
    fn validation_classifies_missing_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.wav");
        let err = validate_input(&missing).unwrap_err();
        assert!(err.to_string().contains("missing.wav"));

        let unsupported = dir.path().join("notes.txt");
        std::fs::write(&unsupported, b"x").unwrap();
        let err = validate_input(&unsupported).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Audio(AudioError::Format { .. })
        ));
    }

    #[test]
    fn mark_remaining_skipped_spares_terminal_items() {
        let mut items = vec![
            BatchItem::new(PathBuf::from("a.wav")),
            BatchItem::new(PathBuf::from("b.wav")),
            BatchItem::new(PathBuf::from("c.wav")),
        ];
        items[0].status = BatchItemStatus::Completed;
        items[1].status = BatchItemStatus::Failed;
        mark_remaining_skipped(&mut items, 1);
        assert_eq!(items[0].status, BatchItemStatus::Completed);
        assert_eq!(items[1].status, BatchItemStatus::Failed);
        assert_eq!(items[2].status, BatchItemStatus::Skipped);
    }
}
