//! Audio-related type definitions
//!
//! Common types used throughout the audio processing pipeline.

use serde::{Deserialize, Serialize};

/// Descriptor produced by the probe before any heavy work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInfo {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Container/codec tag as reported by the prober.
    pub format: String,
    pub size_bytes: u64,
}

/// Audio input device information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDevice {
    pub index: usize,
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub is_default: bool,
}
