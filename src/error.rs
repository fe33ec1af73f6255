//! Error taxonomy for the transcription engine.
//!
//! Each domain has its own typed error enum; the crate-level [`Error`]
//! wraps them all. Workers translate errors into user-facing messages
//! exactly once, at the event boundary, via [`Error::user_message`].

use std::path::PathBuf;
use thiserror::Error;

/// Audio ingestion and capture errors.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("unsupported audio format '{extension}' for {path}")]
    Format { path: PathBuf, extension: String },

    #[error("audio file could not be decoded: {path} ({detail})")]
    Corrupted { path: PathBuf, detail: String },

    #[error("recording failed: {detail}")]
    Recording { detail: String },

    #[error("required audio tool not found: {tool}")]
    Dependency { tool: String },
}

/// Model resolution, download and loading errors.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model not found: {name}")]
    NotFound { name: String },

    #[error("model download failed for {name}: {detail}")]
    Download { name: String, detail: String },

    #[error("model load failed for {name}: {detail}")]
    Load { name: String, detail: String },

    // Legacy: gated hub repositories required an access token. Kept so
    // stored error codes keep deserializing.
    #[error("model hub authentication token missing or invalid")]
    AuthToken,
}

/// Transcription stage errors.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("transcription cancelled")]
    Cancelled,

    #[error("transcription failed: {detail}")]
    Failed { detail: String },
}

/// Diarization stage errors.
#[derive(Debug, Error)]
pub enum DiarizationError {
    #[error("diarization failed: {detail}")]
    Failed { detail: String },

    #[error("no speakers detected in audio")]
    NoSpeakersDetected,
}

/// Host resource errors.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("insufficient memory: required {required_mb} MB, available {available_mb} MB")]
    InsufficientMemory { required_mb: u64, available_mb: u64 },

    #[error("insufficient disk space: required {required_mb} MB")]
    DiskSpace { required_mb: u64 },
}

/// Crate-level error wrapping every domain taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error(transparent)]
    Diarization(#[from] DiarizationError),

    #[error(transparent)]
    System(#[from] SystemError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when this error is a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Transcription(TranscriptionError::Cancelled))
    }

    /// Translate into a message suitable for direct display.
    ///
    /// Typed kinds get a canonical message; everything else goes through
    /// sentinel matching on the lower-cased error text.
    pub fn user_message(&self) -> String {
        match self {
            Error::Audio(AudioError::FileNotFound { path }) => {
                format!("Audio file not found: {}", path.display())
            }
            Error::Audio(AudioError::Format { extension, .. }) => {
                format!("Unsupported audio format: {extension}")
            }
            Error::Audio(AudioError::Corrupted { path, .. }) => {
                format!(
                    "The audio file appears to be corrupted or unreadable: {}",
                    path.display()
                )
            }
            Error::Audio(AudioError::Recording { detail }) => {
                format!("Recording failed: {detail}")
            }
            Error::Audio(AudioError::Dependency { tool }) => format!(
                "{tool} was not found. Install it next to the application or set \
                 the VERBATIM_FFMPEG_DIR environment variable."
            ),
            Error::Model(ModelError::NotFound { name }) => format!(
                "Model '{name}' is not installed. Run the model download step first."
            ),
            Error::Model(ModelError::Download { name, .. }) => format!(
                "Downloading model '{name}' failed. Check your network connection and retry."
            ),
            Error::Model(ModelError::Load { name, .. }) => {
                format!("Model '{name}' could not be loaded.")
            }
            Error::Model(ModelError::AuthToken) => {
                "Model hub authentication failed. Check your access token.".to_string()
            }
            Error::Transcription(TranscriptionError::Cancelled) => {
                "Transcription cancelled".to_string()
            }
            Error::Transcription(TranscriptionError::Failed { detail }) => {
                format!("Transcription failed: {detail}")
            }
            Error::Diarization(DiarizationError::Failed { detail }) => {
                format!("Speaker identification failed: {detail}")
            }
            Error::Diarization(DiarizationError::NoSpeakersDetected) => {
                "No speakers could be detected in this recording.".to_string()
            }
            Error::System(SystemError::InsufficientMemory {
                required_mb,
                available_mb,
            }) => format!(
                "Not enough memory: {required_mb} MB required, {available_mb} MB available. \
                 Close other applications or choose a smaller model."
            ),
            Error::System(SystemError::DiskSpace { required_mb }) => {
                format!("Not enough disk space: {required_mb} MB required.")
            }
            other => translate_unknown(&other.to_string()),
        }
    }
}

/// Map an unclassified error message onto a canonical user message.
pub(crate) fn translate_unknown(detail: &str) -> String {
    let lower = detail.to_lowercase();
    if lower.contains("no space left") {
        "Not enough disk space to complete the operation.".to_string()
    } else if lower.contains("out of memory") || lower.contains("memory") {
        "Not enough memory to complete the operation.".to_string()
    } else if lower.contains("connection") || lower.contains("network") {
        "A network error occurred. Check your connection and retry.".to_string()
    } else if lower.contains("permission") {
        "Permission denied. Check file and folder permissions.".to_string()
    } else {
        format!("An error occurred: {detail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_maps_to_canonical_message() {
        let err = Error::from(TranscriptionError::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.user_message(), "Transcription cancelled");
    }

    #[test]
    fn sentinel_matching_classifies_unknown_errors() {
        assert_eq!(
            translate_unknown("write failed: No space left on device"),
            "Not enough disk space to complete the operation."
        );
        assert_eq!(
            translate_unknown("allocator reported Out of Memory"),
            "Not enough memory to complete the operation."
        );
        assert_eq!(
            translate_unknown("Connection reset by peer"),
            "A network error occurred. Check your connection and retry."
        );
        assert_eq!(
            translate_unknown("Permission denied (os error 13)"),
            "Permission denied. Check file and folder permissions."
        );
        assert_eq!(
            translate_unknown("something odd"),
            "An error occurred: something odd"
        );
    }

    #[test]
    fn io_errors_fall_through_to_sentinels() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let err = Error::from(io);
        assert_eq!(
            err.user_message(),
            "Permission denied. Check file and folder permissions."
        );
    }
}
