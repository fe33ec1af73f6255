//! Model management module
//!
//! Resolves symbolic model names to local artifacts and downloads missing
//! repository snapshots.

pub mod registry;

pub use registry::{ModelRegistry, ProgressFn, DIARIZATION_MODEL_FILE, MODEL_SENTINEL, WHISPER_MODELS};
