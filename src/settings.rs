//! Application settings.
//!
//! A frozen snapshot of tunables, built once at startup from an optional
//! JSON document and passed by reference into the components that need it.
//! There is no global mutable state; callers clone the sections they keep.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Transcription model tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Symbolic model name, see the model registry for known names.
    pub model: String,
    /// Precision hint handed to the inference runtime.
    pub compute_type: String,
    /// Default language hint, two-letter tag or "auto".
    pub language: String,
    /// Inference thread count; 0 means auto (half the logical cores).
    pub cpu_threads: usize,
    /// Suppress non-speech output from the decoder.
    pub vad_filter: bool,
    /// Beam-search width.
    pub beam_size: usize,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "medium".to_string(),
            compute_type: "int8".to_string(),
            language: "auto".to_string(),
            cpu_threads: 0,
            vad_filter: true,
            beam_size: 5,
        }
    }
}

impl TranscriptionSettings {
    /// Explicit positive `cpu_threads`, otherwise the auto count.
    pub fn effective_cpu_threads(&self) -> usize {
        if self.cpu_threads > 0 {
            self.cpu_threads
        } else {
            auto_thread_count()
        }
    }
}

/// Half the logical cores, floored, never below 4.
pub fn auto_thread_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8);
    (cores / 2).max(4)
}

/// Diarization tunables. Zero means auto detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiarizationSettings {
    pub min_speakers: usize,
    pub max_speakers: usize,
}

impl Default for DiarizationSettings {
    fn default() -> Self {
        Self {
            min_speakers: 0,
            max_speakers: 0,
        }
    }
}

/// Capture tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Export format used by `AudioRecorder::save` when none is given.
    pub export_format: String,
    /// Input device index; `None` selects the system default.
    pub input_device: Option<usize>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            export_format: "wav".to_string(),
            input_device: None,
        }
    }
}

/// Working directories. Created on demand by [`Settings::ensure_dirs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSettings {
    pub models: PathBuf,
    pub output: PathBuf,
    pub temp: PathBuf,
}

impl Default for PathsSettings {
    fn default() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("verbatim");
        Self {
            models: root.join("models"),
            output: root.join("output"),
            temp: root.join("temp"),
        }
    }
}

/// Long-file processing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    /// Window used when the host splits long files for chunked runs.
    pub chunk_size_minutes: u32,
    /// Host hint: unload models eagerly between long operations.
    pub aggressive_gc: bool,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            chunk_size_minutes: 10,
            aggressive_gc: true,
        }
    }
}

/// Immutable snapshot of all tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub transcription: TranscriptionSettings,
    pub diarization: DiarizationSettings,
    pub audio: AudioSettings,
    pub paths: PathsSettings,
    pub performance: PerformanceSettings,
}

impl Settings {
    /// Load settings from a JSON document. A missing file yields defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let settings = match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                let settings: Settings = serde_json::from_str(&content).map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid settings document {}: {e}", path.display()),
                    )
                })?;
                info!("Settings loaded from {}", path.display());
                settings
            }
            _ => Settings::default(),
        };
        settings.ensure_dirs()?;
        Ok(settings)
    }

    /// Create the models, output and temp directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.models)?;
        std::fs::create_dir_all(&self.paths.output)?;
        std::fs::create_dir_all(&self.paths.temp)?;
        Ok(())
    }
}
