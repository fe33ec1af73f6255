//! Speaker Diarization Module
//!
//! Identifies who spoke when and assigns speaker labels to transcription
//! segments.

pub mod diarizer;
pub mod fusion;
pub mod sortformer;
pub mod types;

pub use diarizer::Diarizer;
pub use fusion::assign_speakers;
pub use sortformer::MAX_SPEAKERS;
pub use types::{DiarizationResult, SpeakerTurn};
