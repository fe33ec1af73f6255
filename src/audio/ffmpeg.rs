//! External decoder discovery and invocation.
//!
//! All container decoding is delegated to the system `ffmpeg`/`ffprobe`
//! pair. The binaries are searched in a fixed order: an environment
//! override, the `PATH`, the executable's own directory (and its `ffmpeg`
//! subdirectory), then the working root with `resources` and
//! `resources/ffmpeg`. First directory containing both binaries wins.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::audio::types::AudioInfo;
use crate::error::AudioError;

/// Directory override for the decoder binaries.
pub const FFMPEG_DIR_ENV: &str = "VERBATIM_FFMPEG_DIR";

/// Canonical model sample rate.
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
}

/// Resolved decoder binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl FfmpegTools {
    /// Locate `ffmpeg` and `ffprobe`, or fail with `AudioError::Dependency`.
    pub fn locate() -> Result<Self, AudioError> {
        let (ffmpeg_name, ffprobe_name) = binary_names();

        for dir in candidate_dirs() {
            let ffmpeg = dir.join(ffmpeg_name);
            let ffprobe = dir.join(ffprobe_name);
            if ffmpeg.is_file() && ffprobe.is_file() {
                debug!("Decoder tools found in {}", dir.display());
                return Ok(Self { ffmpeg, ffprobe });
            }
        }

        Err(AudioError::Dependency {
            tool: "ffmpeg".to_string(),
        })
    }

    /// Cheap metadata probe; no full decode.
    pub async fn probe(&self, path: &Path) -> Result<AudioInfo, AudioError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AudioError::Dependency {
                tool: format!("ffprobe ({e})"),
            })?;

        if !output.status.success() {
            return Err(AudioError::Corrupted {
                path: path.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let probe: ProbeOutput =
            serde_json::from_slice(&output.stdout).map_err(|e| AudioError::Corrupted {
                path: path.to_path_buf(),
                detail: format!("unreadable probe output: {e}"),
            })?;

        let format = probe.format.ok_or_else(|| AudioError::Corrupted {
            path: path.to_path_buf(),
            detail: "no format information".to_string(),
        })?;
        let audio_stream = probe
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"))
            .ok_or_else(|| AudioError::Corrupted {
                path: path.to_path_buf(),
                detail: "no audio stream".to_string(),
            })?;

        let size_bytes = match format.size.as_deref().and_then(|s| s.parse().ok()) {
            Some(size) => size,
            None => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        };

        Ok(AudioInfo {
            duration_seconds: format
                .duration
                .as_deref()
                .and_then(|d| d.parse().ok())
                .unwrap_or(0.0),
            sample_rate: audio_stream
                .sample_rate
                .as_deref()
                .and_then(|r| r.parse().ok())
                .unwrap_or(0),
            channels: audio_stream.channels.unwrap_or(0),
            format: format.format_name.unwrap_or_default(),
            size_bytes,
        })
    }

    /// Decode `input` and re-encode as 16-bit signed PCM WAV at the given
    /// rate and channel count. Any decodable container is accepted
    /// regardless of its suffix.
    pub async fn convert_to_wav(
        &self,
        input: &Path,
        output: &Path,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), AudioError> {
        let result = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-ar", &sample_rate.to_string()])
            .args(["-ac", &channels.to_string()])
            .args(["-acodec", "pcm_s16le"])
            .arg(output)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AudioError::Dependency {
                tool: format!("ffmpeg ({e})"),
            })?;

        if !result.status.success() {
            return Err(AudioError::Corrupted {
                path: input.to_path_buf(),
                detail: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Decode straight to the canonical in-memory form: 32-bit float
    /// samples, mono, 16 kHz, little-endian over a pipe.
    pub async fn decode_to_f32(&self, input: &Path) -> Result<Vec<f32>, AudioError> {
        let result = Command::new(&self.ffmpeg)
            .arg("-i")
            .arg(input)
            .args(["-f", "f32le"])
            .args(["-ac", "1"])
            .args(["-ar", &WHISPER_SAMPLE_RATE.to_string()])
            .args(["-acodec", "pcm_f32le"])
            .arg("pipe:1")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AudioError::Dependency {
                tool: format!("ffmpeg ({e})"),
            })?;

        if !result.status.success() {
            return Err(AudioError::Corrupted {
                path: input.to_path_buf(),
                detail: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        let samples = result
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect::<Vec<f32>>();
        info!(
            "Decoded {}: {} samples ({:.2}s)",
            input.display(),
            samples.len(),
            samples.len() as f64 / WHISPER_SAMPLE_RATE as f64
        );
        Ok(samples)
    }

    /// Re-encode a WAV into another container (used by capture export).
    pub async fn convert_to_format(&self, input: &Path, output: &Path) -> Result<(), AudioError> {
        let result = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AudioError::Dependency {
                tool: format!("ffmpeg ({e})"),
            })?;

        if !result.status.success() {
            return Err(AudioError::Corrupted {
                path: input.to_path_buf(),
                detail: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

fn binary_names() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("ffmpeg.exe", "ffprobe.exe")
    } else {
        ("ffmpeg", "ffprobe")
    }
}

fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();

    if let Ok(env_dir) = std::env::var(FFMPEG_DIR_ENV) {
        if !env_dir.is_empty() {
            dirs.push(PathBuf::from(env_dir));
        }
    }

    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            dirs.push(exe_dir.to_path_buf());
            dirs.push(exe_dir.join("ffmpeg"));
        }
    }

    if let Ok(root) = std::env::current_dir() {
        dirs.push(root.clone());
        dirs.push(root.join("resources"));
        dirs.push(root.join("resources").join("ffmpeg"));
    }

    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_override_comes_first() {
        std::env::set_var(FFMPEG_DIR_ENV, "/nonexistent/override");
        let dirs = candidate_dirs();
        assert_eq!(dirs.first(), Some(&PathBuf::from("/nonexistent/override")));
        std::env::remove_var(FFMPEG_DIR_ENV);
    }

    #[test]
    #[serial]
    fn missing_tools_report_dependency_error() {
        // Point every search location somewhere empty so discovery fails.
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(FFMPEG_DIR_ENV, dir.path());
        let saved_path = std::env::var_os("PATH");
        std::env::set_var("PATH", dir.path());

        let result = FfmpegTools::locate();

        if let Some(path) = saved_path {
            std::env::set_var("PATH", path);
        } else {
            std::env::remove_var("PATH");
        }
        std::env::remove_var(FFMPEG_DIR_ENV);

        let err = result.expect_err("discovery should fail with empty search dirs");
        assert!(matches!(err, AudioError::Dependency { tool } if tool == "ffmpeg"));
    }
}
