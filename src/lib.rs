//! Verbatim - offline speaker-attributed transcription engine.
//!
//! Turns recorded conversations into speaker-attributed, timestamped
//! transcripts, fully offline: audio normalization, Whisper-based
//! recognition, Sortformer-based diarization, fusion of the two streams,
//! and batch orchestration with cancellation and progress events.

pub mod asr;
pub mod audio;
pub mod batch;
pub mod diarization;
pub mod error;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod settings;
pub mod worker;

pub use asr::{TranscriptionResult, TranscriptionSegment};
pub use diarization::{DiarizationResult, SpeakerTurn};
pub use error::{Error, Result};
pub use settings::Settings;
pub use worker::{CancelToken, WorkerEvent};

/// Initialize tracing output for the host process. Call once at startup.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
