//! Audio processing module
//!
//! Format probing, canonical-form conversion, chunking, temp hygiene and
//! device capture.

pub mod capture;
pub mod ffmpeg;
pub mod processor;
pub mod types;

pub use capture::AudioRecorder;
pub use ffmpeg::{FfmpegTools, FFMPEG_DIR_ENV, WHISPER_SAMPLE_RATE};
pub use processor::{AudioProcessor, SUPPORTED_EXTENSIONS, TEMP_PATTERNS};
pub use types::{AudioInfo, InputDevice};
