//! ASR-related type definitions
//!
//! Common types used throughout the speech recognition pipeline.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Individual word with timing and probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub probability: f32,
}

/// A timed span of transcribed text.
///
/// Invariants: `start <= end`; `words` are ordered and contained within
/// `[start, end]`; consecutive segments of a result are non-decreasing by
/// `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
    pub confidence: f32,
    pub speaker: Option<String>,
}

/// Complete transcription of one input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub segments: Vec<TranscriptionSegment>,
    /// Detected language, two-letter tag.
    pub language: String,
    pub language_probability: f32,
    /// Audio duration in seconds.
    pub duration: f64,
}

/// Finite, forward-only sequence of segments in time order.
///
/// Produced by `Transcriber::transcribe_stream`; not restartable. Callers
/// needing random access must collect the segments.
pub struct SegmentStream {
    rx: mpsc::UnboundedReceiver<TranscriptionSegment>,
}

impl SegmentStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<TranscriptionSegment>) -> Self {
        Self { rx }
    }

    /// Next segment, or `None` once the underlying decoder is exhausted.
    pub async fn next(&mut self) -> Option<TranscriptionSegment> {
        self.rx.recv().await
    }
}
