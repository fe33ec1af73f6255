//! Single-file orchestration: transcribe, diarize, fuse.
//!
//! Drives one input through the full pipeline with remapped progress and
//! cancellation checkpoints between stages. Temp artifacts are owned and
//! cleaned by the stage components on every exit path.

use std::path::Path;

use tracing::info;

use crate::asr::types::TranscriptionResult;
use crate::asr::Transcriber;
use crate::audio::AudioProcessor;
use crate::diarization::{assign_speakers, Diarizer};
use crate::error::{AudioError, Result};
use crate::worker::{CancelToken, EventSender};

/// Options for a full pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Two-letter tag, or `None`/"auto" for detection.
    pub language: Option<String>,
    /// Run the diarization stage and fuse speakers.
    pub diarization: bool,
    /// Forwarded to the diarizer; 0 means auto.
    pub min_speakers: usize,
    pub max_speakers: usize,
}

/// Run "full transcription with diarization" over one file.
///
/// Progress bands: model load 0-10, transcription 10-40, diarization
/// 45-95, fusion 95, done 100. The speakerless result is emitted through
/// `events` as soon as transcription finishes. The cancel flag is
/// observed after each stage and raises `TranscriptionError::Cancelled`.
pub async fn run_full_pipeline(
    transcriber: &mut Transcriber,
    diarizer: &mut Diarizer,
    audio_path: &Path,
    options: &PipelineOptions,
    events: &EventSender<TranscriptionResult>,
    cancel: &CancelToken,
) -> Result<TranscriptionResult> {
    if !audio_path.exists() {
        return Err(AudioError::FileNotFound {
            path: audio_path.to_path_buf(),
        }
        .into());
    }
    if !AudioProcessor::is_supported(audio_path) {
        return Err(AudioError::Format {
            path: audio_path.to_path_buf(),
            extension: audio_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string(),
        }
        .into());
    }

    info!("Pipeline started for {}", audio_path.display());

    // Stage 1: model load, 0-10.
    events.progress("Transcription", 0.0, "Loading model...");
    let load_events = events.clone();
    transcriber
        .load(Some(&move |msg: &str, pct: f32| {
            load_events.progress("Transcription", pct * 0.1, msg);
        }))
        .await?;
    cancel.check()?;

    // Stage 2: transcription, 10-40.
    events.progress("Transcription", 10.0, "Transcribing...");
    let segment_events = events.clone();
    let mut result = transcriber
        .transcribe(
            audio_path,
            options.language.as_deref(),
            Some(&move |index: usize, text: &str| {
                let percent = (10.0 + index as f32 * 2.0).min(40.0);
                segment_events.progress("Transcription", percent, text);
            }),
            cancel,
        )
        .await?;
    cancel.check()?;

    events.progress("Transcription", 40.0, "Transcription complete");
    events.transcription_done(result.clone());

    if options.diarization {
        // Stage 3: diarization, 45-95 remapped from the component's 0-100.
        events.progress("Diarization", 45.0, "Identifying speakers...");
        let diar_events = events.clone();
        let diarization = diarizer
            .diarize(
                audio_path,
                bound(options.min_speakers),
                bound(options.max_speakers),
                Some(&move |msg: &str, pct: f32| {
                    diar_events.progress("Diarization", 45.0 + pct * 0.5, msg);
                }),
            )
            .await?;
        cancel.check()?;

        // Stage 4: fusion.
        events.progress("Fusion", 95.0, "Assigning speakers...");
        assign_speakers(&mut result, &diarization);

        events.progress(
            "Done",
            100.0,
            &format!(
                "{} segments, {} speakers",
                result.segments.len(),
                diarization.speaker_count
            ),
        );
    } else {
        events.progress(
            "Done",
            100.0,
            &format!("{} segments", result.segments.len()),
        );
    }

    info!("Pipeline finished for {}", audio_path.display());
    Ok(result)
}

fn bound(value: usize) -> Option<usize> {
    if value > 0 {
        Some(value)
    } else {
        None
    }
}
