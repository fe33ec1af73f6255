//! Speaker diarization front end.
//!
//! Owns the Sortformer back end lifecycle and the canonical temp-WAV
//! handoff: every input is converted to mono 16 kHz WAV in the temp
//! directory, fed to the model, and the temp file is removed on every
//! exit path. Speaker labels are normalized to the regular `SPEAKER_NN`
//! form. This component has a single back end by contract; there is no
//! mode selector.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::audio::processor::AudioProcessor;
use crate::diarization::sortformer::{SortformerModel, MAX_SPEAKERS};
use crate::diarization::types::{DiarizationResult, SpeakerTurn};
use crate::error::{DiarizationError, ModelError, Result};
use crate::models::{ProgressFn, DIARIZATION_MODEL_FILE};
use crate::settings::{auto_thread_count, DiarizationSettings, Settings};

/// Deletes the wrapped path when dropped, covering early returns and
/// error paths alike.
struct TempGuard(PathBuf);

impl Drop for TempGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if self.0.exists() {
                warn!("cannot remove temp file {}: {e}", self.0.display());
            }
        }
    }
}

/// Sortformer-backed diarizer. Auto speaker-count detection up to 4.
pub struct Diarizer {
    settings: DiarizationSettings,
    model_path: PathBuf,
    temp_dir: PathBuf,
    processor: AudioProcessor,
    model: Option<Arc<SortformerModel>>,
}

impl Diarizer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.diarization.clone(),
            model_path: settings
                .paths
                .models
                .join("sortformer")
                .join(DIARIZATION_MODEL_FILE),
            temp_dir: settings.paths.temp.clone(),
            processor: AudioProcessor::new(&settings.paths),
            model: None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        "sortformer"
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Load the diarization model. Idempotent from the loaded state.
    pub async fn load(&mut self, progress: Option<&ProgressFn>) -> Result<()> {
        if self.model.is_some() {
            return Ok(());
        }

        if let Some(cb) = progress {
            cb("Loading diarization model...", 0.0);
        }

        if !self.model_path.exists() {
            return Err(ModelError::NotFound {
                name: "sortformer".to_string(),
            }
            .into());
        }

        if let Some(cb) = progress {
            cb("Loading Sortformer...", 30.0);
        }

        let model_path = self.model_path.clone();
        let threads = auto_thread_count();
        let model = tokio::task::spawn_blocking(move || SortformerModel::load(&model_path, threads))
            .await
            .map_err(|e| DiarizationError::Failed {
                detail: format!("model load task failed: {e}"),
            })??;
        self.model = Some(Arc::new(model));

        if let Some(cb) = progress {
            cb("Diarization ready", 100.0);
        }
        info!("Diarization model loaded");
        Ok(())
    }

    /// Release model references and reclaim memory. Safe when unloaded.
    pub fn unload(&mut self) {
        if self.model.take().is_some() {
            info!("Diarization model unloaded");
        }
    }

    /// Diarize an audio file into speaker turns.
    ///
    /// `min_speakers`/`max_speakers` are accepted for forward
    /// compatibility; the model detects the speaker count itself, capped
    /// at [`MAX_SPEAKERS`].
    pub async fn diarize(
        &mut self,
        audio_path: &Path,
        min_speakers: Option<usize>,
        max_speakers: Option<usize>,
        progress: Option<&ProgressFn>,
    ) -> Result<DiarizationResult> {
        if self.model.is_none() {
            // Load silently: the reported phases below own the 20-100
            // range, and a forwarded load reaching 100 would clamp them
            // all away under monotonic progress.
            self.load(None).await?;
        }

        // Accepted for forward compatibility; the model auto-detects.
        let min_speakers = min_speakers.or(nonzero(self.settings.min_speakers));
        let max_speakers = max_speakers.or(nonzero(self.settings.max_speakers));
        if min_speakers.is_some() || max_speakers.is_some() {
            info!(
                "Requested speaker bounds ({min_speakers:?}, {max_speakers:?}) noted; \
                 the model auto-detects up to {MAX_SPEAKERS} speakers"
            );
        }

        if let Some(cb) = progress {
            cb("Preparing audio...", 20.0);
        }
        info!("Diarizing {}...", audio_path.display());

        std::fs::create_dir_all(&self.temp_dir).map_err(|e| DiarizationError::Failed {
            detail: format!("cannot create temp directory: {e}"),
        })?;
        let stem = audio_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let temp_wav = self.temp_dir.join(format!("{stem}_diarize.wav"));

        let _guard = TempGuard(temp_wav.clone());
        self.processor
            .convert_for_whisper(audio_path, Some(temp_wav.clone()), None)
            .await?;

        if let Some(cb) = progress {
            cb("Running speaker analysis...", 30.0);
        }

        let model = self
            .model
            .clone()
            .ok_or_else(|| DiarizationError::Failed {
                detail: "model not loaded".to_string(),
            })?;
        let lines = tokio::task::spawn_blocking(move || model.diarize(&temp_wav))
            .await
            .map_err(|e| DiarizationError::Failed {
                detail: format!("diarization task failed: {e}"),
            })??;

        if let Some(cb) = progress {
            cb("Parsing results...", 80.0);
        }
        let turns = parse_turn_lines(&lines);
        let result = DiarizationResult::from_turns(turns);

        if let Some(cb) = progress {
            cb("Diarization complete", 100.0);
        }
        info!(
            "Diarization finished: {} turns, {} speakers",
            result.turns.len(),
            result.speaker_count
        );
        Ok(result)
    }
}

fn nonzero(value: usize) -> Option<usize> {
    if value > 0 {
        Some(value)
    } else {
        None
    }
}

/// Parse `"<start> <end> <label>"` lines, skipping anything malformed.
fn parse_turn_lines(lines: &[String]) -> Vec<SpeakerTurn> {
    let mut turns = Vec::with_capacity(lines.len());
    for line in lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            warn!("skipping malformed diarization line: {line:?}");
            continue;
        }
        let (start, end) = match (parts[0].parse::<f64>(), parts[1].parse::<f64>()) {
            (Ok(start), Ok(end)) => (start, end),
            _ => {
                warn!("skipping malformed diarization line: {line:?}");
                continue;
            }
        };
        if start >= end {
            warn!("skipping degenerate turn: {line:?}");
            continue;
        }
        turns.push(SpeakerTurn {
            start,
            end,
            speaker: normalize_speaker_label(parts[2]),
        });
    }
    turns
}

/// Normalize raw model labels (`speaker_0`, `SPEAKER_3`, `2`, ...) to the
/// regular zero-padded `SPEAKER_NN` form.
fn normalize_speaker_label(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let digits = upper
        .rsplit('_')
        .next()
        .unwrap_or(&upper)
        .trim();
    if let Ok(index) = digits.parse::<usize>() {
        return format!("SPEAKER_{index:02}");
    }
    if upper.starts_with("SPEAKER_") {
        upper
    } else {
        format!("SPEAKER_{upper}")
    }
}
