//! Automatic Speech Recognition (ASR) module
//!
//! Whisper-based speech recognition producing ordered, word-timed
//! segments.

pub mod transcriber;
pub mod types;

pub use transcriber::{SegmentProgressFn, Transcriber};
pub use types::{SegmentStream, TranscriptionResult, TranscriptionSegment, Word};
