//! Speech recognition over the whisper.cpp runtime.
//!
//! Wraps a CPU-bound whisper context with an idempotent load/unload state
//! machine, per-segment progress reporting and cooperative cancellation.
//! One instance must not service concurrent `transcribe` calls.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::asr::types::{SegmentStream, TranscriptionResult, TranscriptionSegment, Word};
use crate::audio::processor::AudioProcessor;
use crate::audio::WHISPER_SAMPLE_RATE;
use crate::error::{ModelError, Result, SystemError, TranscriptionError};
use crate::models::{ModelRegistry, ProgressFn};
use crate::settings::{Settings, TranscriptionSettings};
use crate::worker::CancelToken;

/// Per-segment progress: `(ordinal index, text preview)`.
pub type SegmentProgressFn = dyn Fn(usize, &str) + Send + Sync;

const PREVIEW_CHARS: usize = 80;

/// Whisper-based transcriber bound to the CPU.
pub struct Transcriber {
    settings: TranscriptionSettings,
    model_name: String,
    registry: Arc<ModelRegistry>,
    processor: AudioProcessor,
    ctx: Option<Arc<WhisperContext>>,
}

impl Transcriber {
    pub fn new(settings: &Settings, registry: Arc<ModelRegistry>) -> Self {
        Self {
            settings: settings.transcription.clone(),
            model_name: settings.transcription.model.clone(),
            registry,
            processor: AudioProcessor::new(&settings.paths),
            ctx: None,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn is_loaded(&self) -> bool {
        self.ctx.is_some()
    }

    /// Load the model into memory, downloading it first if necessary.
    /// Idempotent from the loaded state.
    pub async fn load(&mut self, progress: Option<&ProgressFn>) -> Result<()> {
        if self.ctx.is_some() {
            debug!("Model already loaded");
            return Ok(());
        }

        let threads = self.settings.effective_cpu_threads();
        // The math-library pool must be capped before the runtime starts.
        std::env::set_var("OMP_NUM_THREADS", threads.to_string());
        std::env::set_var("MKL_NUM_THREADS", threads.to_string());
        std::env::set_var("OMP_WAIT_POLICY", "PASSIVE");
        info!("CPU threads configured: {threads}");

        check_available_memory(&self.model_name)?;

        // Sub-range the two steps so the sequence stays non-decreasing:
        // download/cache check fills 0-80, the in-memory load 80-100.
        let scaled;
        let download_progress: Option<&ProgressFn> = match progress {
            Some(cb) => {
                scaled = move |msg: &str, pct: f32| cb(msg, pct * 0.8);
                Some(&scaled)
            }
            None => None,
        };
        let model_dir = self
            .registry
            .ensure(&self.model_name, download_progress)
            .await?;

        if let Some(cb) = progress {
            cb("Loading model into memory...", 80.0);
        }
        info!(
            "Loading model {} ({})...",
            self.model_name, self.settings.compute_type
        );

        let model_file = model_dir.join(crate::models::MODEL_SENTINEL);
        let model_path = model_file.to_string_lossy().into_owned();
        let name = self.model_name.clone();
        let ctx = tokio::task::spawn_blocking(move || {
            let mut ctx_params = WhisperContextParameters::default();
            ctx_params.use_gpu(false);
            WhisperContext::new_with_params(&model_path, ctx_params)
        })
        .await
        .map_err(|e| TranscriptionError::Failed {
            detail: format!("model load task failed: {e}"),
        })?
        .map_err(|e| ModelError::Load {
            name,
            detail: e.to_string(),
        })?;

        self.ctx = Some(Arc::new(ctx));

        if let Some(cb) = progress {
            cb("Model ready", 100.0);
        }
        info!("Model loaded");
        Ok(())
    }

    /// Release the model memory. Safe when nothing is loaded.
    pub fn unload(&mut self) {
        if self.ctx.take().is_some() {
            info!("Model unloaded");
        }
    }

    /// Transcribe a file into timed, word-stamped segments.
    ///
    /// `language` may be a two-letter tag or `"auto"`; `None` falls back
    /// to the configured default. The progress callback fires once per
    /// produced segment with a bounded text preview, and the cancel flag
    /// is observed between segment emissions.
    pub async fn transcribe(
        &mut self,
        audio_path: &Path,
        language: Option<&str>,
        progress: Option<&SegmentProgressFn>,
        cancel: &CancelToken,
    ) -> Result<TranscriptionResult> {
        if self.ctx.is_none() {
            self.load(None).await?;
        }

        let language = self.resolve_language(language);
        info!(
            "Transcribing {} (language: {})...",
            audio_path.display(),
            language.as_deref().unwrap_or("auto")
        );

        let samples = self.processor.decode_to_f32(audio_path).await?;
        let raw = self.run_inference(samples, language).await?;

        let mut segments = Vec::with_capacity(raw.segments.len());
        for (index, segment) in raw.segments.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(TranscriptionError::Cancelled.into());
            }
            if let Some(cb) = progress {
                cb(index, &preview(&segment.text));
            }
            segments.push(segment);
        }

        let result = TranscriptionResult {
            segments,
            language: raw.language,
            language_probability: raw.language_probability,
            duration: raw.duration,
        };
        info!(
            "Transcription finished: {} segments, {:.1}s, language {}",
            result.segments.len(),
            result.duration,
            result.language
        );
        Ok(result)
    }

    /// Stream segments as a finite, forward-only sequence.
    pub async fn transcribe_stream(
        &mut self,
        audio_path: &Path,
        language: Option<&str>,
    ) -> Result<SegmentStream> {
        if self.ctx.is_none() {
            self.load(None).await?;
        }

        let language = self.resolve_language(language);
        let samples = self.processor.decode_to_f32(audio_path).await?;
        let ctx = self.context()?;
        let params = InferenceParams::from_settings(&self.settings, language);

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let _ = tokio::task::spawn_blocking(move || match run_whisper(&ctx, &samples, &params) {
            Ok(raw) => {
                for segment in raw.segments {
                    if tx.send(segment).is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("streaming transcription failed: {e}");
            }
        });

        Ok(SegmentStream::new(rx))
    }

    fn resolve_language(&self, language: Option<&str>) -> Option<String> {
        let requested = language.unwrap_or(&self.settings.language);
        if requested.is_empty() || requested == "auto" {
            None
        } else {
            Some(requested.to_string())
        }
    }

    fn context(&self) -> Result<Arc<WhisperContext>> {
        self.ctx.clone().ok_or_else(|| {
            TranscriptionError::Failed {
                detail: "model not loaded".to_string(),
            }
            .into()
        })
    }

    async fn run_inference(
        &self,
        samples: Vec<f32>,
        language: Option<String>,
    ) -> Result<RawTranscription> {
        let ctx = self.context()?;
        let params = InferenceParams::from_settings(&self.settings, language);
        tokio::task::spawn_blocking(move || run_whisper(&ctx, &samples, &params))
            .await
            .map_err(|e| {
                TranscriptionError::Failed {
                    detail: format!("inference task failed: {e}"),
                }
            })?
            .map_err(Into::into)
    }
}

struct InferenceParams {
    language: Option<String>,
    beam_size: usize,
    threads: usize,
    suppress_non_speech: bool,
}

impl InferenceParams {
    fn from_settings(settings: &TranscriptionSettings, language: Option<String>) -> Self {
        Self {
            language,
            beam_size: settings.beam_size.max(1),
            threads: settings.effective_cpu_threads(),
            suppress_non_speech: settings.vad_filter,
        }
    }
}

struct RawTranscription {
    segments: Vec<TranscriptionSegment>,
    language: String,
    language_probability: f32,
    duration: f64,
}

fn run_whisper(
    ctx: &WhisperContext,
    samples: &[f32],
    params: &InferenceParams,
) -> std::result::Result<RawTranscription, TranscriptionError> {
    let failed = |detail: String| TranscriptionError::Failed { detail };

    let mut state = ctx
        .create_state()
        .map_err(|e| failed(format!("cannot create decoding state: {e}")))?;

    let mut full_params = FullParams::new(SamplingStrategy::BeamSearch {
        beam_size: params.beam_size as i32,
        patience: -1.0,
    });
    let language_tag = params.language.as_deref().unwrap_or("auto");
    full_params.set_language(Some(language_tag));
    full_params.set_n_threads(params.threads as i32);
    full_params.set_translate(false);
    full_params.set_token_timestamps(true);
    full_params.set_print_special(false);
    full_params.set_print_progress(false);
    full_params.set_print_realtime(false);
    full_params.set_print_timestamps(false);
    full_params.set_suppress_blank(true);
    full_params.set_suppress_non_speech_tokens(params.suppress_non_speech);

    state
        .full(full_params, samples)
        .map_err(|e| failed(format!("inference failed: {e}")))?;

    let segment_count = state
        .full_n_segments()
        .map_err(|e| failed(format!("cannot read segment count: {e}")))?;

    let mut segments = Vec::with_capacity(segment_count as usize);
    for i in 0..segment_count {
        let text = state
            .full_get_segment_text(i)
            .map_err(|e| failed(format!("cannot read segment {i}: {e}")))?;
        let start = state
            .full_get_segment_t0(i)
            .map_err(|e| failed(e.to_string()))? as f64
            / 100.0;
        let end = state
            .full_get_segment_t1(i)
            .map_err(|e| failed(e.to_string()))? as f64
            / 100.0;

        let (words, confidence) = collect_words(&state, i, start, end);
        segments.push(TranscriptionSegment {
            start,
            end,
            text: text.trim().to_string(),
            words,
            confidence,
            speaker: None,
        });
    }

    let language = match params.language.as_deref() {
        Some(lang) => lang.to_string(),
        None => state
            .full_lang_id()
            .ok()
            .and_then(whisper_rs::get_lang_str)
            .unwrap_or("en")
            .to_string(),
    };
    let language_probability = if params.language.is_some() {
        1.0
    } else if segments.is_empty() {
        0.0
    } else {
        let sum: f32 = segments.iter().map(|s| s.confidence).sum();
        (sum / segments.len() as f32).clamp(0.0, 1.0)
    };

    Ok(RawTranscription {
        segments,
        language,
        language_probability,
        duration: samples.len() as f64 / WHISPER_SAMPLE_RATE as f64,
    })
}

/// Merge decoder tokens into whole words with clamped timings.
fn collect_words(
    state: &whisper_rs::WhisperState,
    segment: i32,
    seg_start: f64,
    seg_end: f64,
) -> (Vec<Word>, f32) {
    let token_count = match state.full_n_tokens(segment) {
        Ok(count) => count,
        Err(_) => return (Vec::new(), 0.0),
    };

    let mut words: Vec<Word> = Vec::new();
    let mut probability_sum = 0.0f32;
    let mut probability_count = 0u32;

    for j in 0..token_count {
        let text = match state.full_get_token_text(segment, j) {
            Ok(text) => text,
            Err(_) => continue, // byte-level token, not valid UTF-8
        };
        if text.starts_with("[_") {
            continue;
        }
        let data = match state.full_get_token_data(segment, j) {
            Ok(data) => data,
            Err(_) => continue,
        };

        probability_sum += data.p;
        probability_count += 1;

        let t0 = (data.t0 as f64 / 100.0).clamp(seg_start, seg_end);
        let t1 = (data.t1 as f64 / 100.0).clamp(seg_start, seg_end);

        let starts_word = text.starts_with(' ') || words.is_empty();
        if starts_word {
            words.push(Word {
                word: text.trim_start().to_string(),
                start: t0,
                end: t1.max(t0),
                probability: data.p,
            });
        } else if let Some(last) = words.last_mut() {
            last.word.push_str(&text);
            last.end = t1.max(last.end);
            last.probability = last.probability.min(data.p);
        }
    }

    let confidence = if probability_count > 0 {
        probability_sum / probability_count as f32
    } else {
        0.0
    };
    (words, confidence)
}

fn preview(text: &str) -> String {
    text.trim().chars().take(PREVIEW_CHARS).collect()
}

fn check_available_memory(model_name: &str) -> Result<()> {
    let required_mb = required_memory_mb(model_name);
    let sys = sysinfo::System::new_all();
    let available_mb = sys.available_memory() / (1024 * 1024);
    if available_mb < required_mb {
        return Err(SystemError::InsufficientMemory {
            required_mb,
            available_mb,
        }
        .into());
    }
    Ok(())
}

fn required_memory_mb(model_name: &str) -> u64 {
    match model_name {
        "tiny" => 400,
        "base" => 700,
        "small" => 1500,
        "medium" => 2600,
        name if name.starts_with("large") => 6000,
        _ => 2600,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_bounded_to_80_chars() {
        let long = "x".repeat(300);
        assert_eq!(preview(&long).chars().count(), 80);
        assert_eq!(preview("  hello  "), "hello");
    }

    #[test]
    fn memory_requirements_scale_with_model() {
        assert!(required_memory_mb("tiny") < required_memory_mb("medium"));
        assert_eq!(required_memory_mb("large-v3"), 6000);
        assert_eq!(required_memory_mb("large-v3-french"), 6000);
    }

    #[test]
    fn language_resolution_treats_auto_as_none() {
        let settings = Settings::default();
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ModelRegistry::new(dir.path()).unwrap());
        let transcriber = Transcriber::new(&settings, registry);

        assert_eq!(transcriber.resolve_language(Some("fr")).as_deref(), Some("fr"));
        assert_eq!(transcriber.resolve_language(Some("auto")), None);
        // Settings default language is "auto".
        assert_eq!(transcriber.resolve_language(None), None);
    }

    #[test]
    fn unload_is_safe_when_nothing_loaded() {
        let settings = Settings::default();
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ModelRegistry::new(dir.path()).unwrap());
        let mut transcriber = Transcriber::new(&settings, registry);
        assert!(!transcriber.is_loaded());
        transcriber.unload();
        assert!(!transcriber.is_loaded());
    }
}
