//! Audio normalization, chunking and temp-file hygiene.
//!
//! Normalizes any supported container to the canonical model format:
//! 16 kHz, mono, 16-bit PCM WAV on disk or 32-bit float samples in
//! memory. The suffix check is advisory; the decoder is authoritative,
//! so a mislabeled container that still decodes is accepted.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{info, warn};

use crate::audio::ffmpeg::{FfmpegTools, WHISPER_SAMPLE_RATE};
use crate::audio::types::AudioInfo;
use crate::error::AudioError;
use crate::models::ProgressFn;
use crate::settings::PathsSettings;

/// Supported input containers, matched case-insensitively on the suffix.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "flac", "ogg", "wma", "aac"];

/// Default temp-file patterns swept by [`AudioProcessor::cleanup_temp`].
pub const TEMP_PATTERNS: &[&str] = &["*.wav", "*.tmp"];

/// Audio file processing and conversion.
pub struct AudioProcessor {
    temp_dir: PathBuf,
    tools: OnceLock<FfmpegTools>,
}

impl AudioProcessor {
    pub fn new(paths: &PathsSettings) -> Self {
        Self {
            temp_dir: paths.temp.clone(),
            tools: OnceLock::new(),
        }
    }

    /// Whether the file suffix belongs to the supported set.
    pub fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_lowercase();
                SUPPORTED_EXTENSIONS.iter().any(|s| *s == lower)
            })
            .unwrap_or(false)
    }

    /// Resolve the external decoder once and cache it.
    pub fn tools(&self) -> Result<&FfmpegTools, AudioError> {
        if let Some(tools) = self.tools.get() {
            return Ok(tools);
        }
        let located = FfmpegTools::locate()?;
        Ok(self.tools.get_or_init(|| located))
    }

    /// Validate a file: existence, suffix, then an authoritative probe.
    pub async fn validate(&self, path: &Path) -> Result<AudioInfo, AudioError> {
        if !path.exists() {
            return Err(AudioError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        if !Self::is_supported(path) {
            return Err(AudioError::Format {
                path: path.to_path_buf(),
                extension: path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_string(),
            });
        }
        self.probe(path).await
    }

    /// Probe without validation; fails with `Corrupted` when undecodable.
    pub async fn probe(&self, path: &Path) -> Result<AudioInfo, AudioError> {
        self.tools()?.probe(path).await
    }

    /// Convert a file to the canonical on-disk form (16 kHz mono 16-bit
    /// PCM WAV). Defaults to `<temp>/<stem>_converted.wav`.
    pub async fn convert_for_whisper(
        &self,
        input: &Path,
        output: Option<PathBuf>,
        progress: Option<&ProgressFn>,
    ) -> Result<PathBuf, AudioError> {
        if !Self::is_supported(input) {
            return Err(AudioError::Format {
                path: input.to_path_buf(),
                extension: input
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_string(),
            });
        }
        let tools = self.tools()?;

        let output = match output {
            Some(path) => path,
            None => {
                std::fs::create_dir_all(&self.temp_dir).map_err(|e| AudioError::Recording {
                    detail: format!("cannot create temp directory: {e}"),
                })?;
                let stem = input
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("audio");
                self.temp_dir.join(format!("{stem}_converted.wav"))
            }
        };

        if let Some(cb) = progress {
            cb("Loading audio...", 10.0);
        }
        info!("Converting {} to canonical WAV...", input.display());

        if let Some(cb) = progress {
            cb("Converting...", 50.0);
        }
        if let Some(parent) = output.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        tools
            .convert_to_wav(input, &output, WHISPER_SAMPLE_RATE, 1)
            .await?;

        if let Some(cb) = progress {
            cb("Conversion complete", 100.0);
        }
        info!("Audio converted: {}", output.display());
        Ok(output)
    }

    /// Canonical in-memory buffer: mono 16 kHz 32-bit float samples.
    pub async fn decode_to_f32(&self, path: &Path) -> Result<Vec<f32>, AudioError> {
        self.tools()?.decode_to_f32(path).await
    }

    /// Split a file into consecutive non-overlapping canonical chunks of
    /// `chunk_minutes` each; the last chunk may be shorter. Chunks land in
    /// `<temp>/chunks` unless a directory is given, named
    /// `<stem>_chunk_NNN.wav`.
    pub async fn split_audio(
        &self,
        path: &Path,
        chunk_minutes: u32,
        output_dir: Option<PathBuf>,
    ) -> Result<Vec<PathBuf>, AudioError> {
        let output_dir = output_dir.unwrap_or_else(|| self.temp_dir.join("chunks"));
        std::fs::create_dir_all(&output_dir).map_err(|e| AudioError::Recording {
            detail: format!("cannot create chunk directory: {e}"),
        })?;

        let samples = self.decode_to_f32(path).await?;
        let window = chunk_minutes as usize * 60 * WHISPER_SAMPLE_RATE as usize;
        if window == 0 {
            return Err(AudioError::Recording {
                detail: "chunk size must be positive".to_string(),
            });
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("audio");

        let mut chunks = Vec::new();
        for (index, slice) in samples.chunks(window).enumerate() {
            let chunk_path = output_dir.join(chunk_file_name(stem, index));
            write_wav_i16(&chunk_path, slice, WHISPER_SAMPLE_RATE, 1)?;
            chunks.push(chunk_path);
        }

        info!(
            "Audio split into {} chunks of {} min",
            chunks.len(),
            chunk_minutes
        );
        Ok(chunks)
    }

    /// Remove temp files matching the shell-style patterns. A missing
    /// temp directory is a no-op returning 0.
    pub fn cleanup_temp(&self, patterns: &[&str]) -> usize {
        if !self.temp_dir.exists() {
            return 0;
        }

        let entries = match std::fs::read_dir(&self.temp_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read temp directory: {e}");
                return 0;
            }
        };

        let mut count = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if patterns.iter().any(|p| wildcard_match(p, name)) {
                match std::fs::remove_file(&path) {
                    Ok(()) => count += 1,
                    Err(e) => warn!("cannot remove {}: {e}", path.display()),
                }
            }
        }

        info!("Cleanup: {count} temp files removed");
        count
    }
}

pub(crate) fn chunk_file_name(stem: &str, index: usize) -> String {
    format!("{stem}_chunk_{index:03}.wav")
}

/// Write float samples as a 16-bit signed PCM WAV.
pub(crate) fn write_wav_i16(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
) -> Result<(), AudioError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(|e| AudioError::Recording {
        detail: format!("cannot create {}: {e}", path.display()),
    })?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(value)
            .map_err(|e| AudioError::Recording {
                detail: format!("write failed for {}: {e}", path.display()),
            })?;
    }
    writer.finalize().map_err(|e| AudioError::Recording {
        detail: format!("finalize failed for {}: {e}", path.display()),
    })?;
    Ok(())
}

/// Read a mono WAV back into float samples.
pub(crate) fn read_wav_f32(path: &Path) -> Result<Vec<f32>, AudioError> {
    let reader = hound::WavReader::open(path).map_err(|e| AudioError::Corrupted {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max)
                .collect()
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(|s| s.ok())
            .collect(),
    };

    if channels <= 1 {
        return Ok(samples);
    }
    // Downmix by arithmetic mean across channels.
    Ok(samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

/// Minimal shell-style matcher supporting `*` and `?`.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    let (mut p, mut n) = (0usize, 0usize);
    let (mut star, mut star_n) = (None::<usize>, 0usize);

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_n = n;
            p += 1;
        } else if let Some(sp) = star {
            p = sp + 1;
            star_n += 1;
            n = star_n;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PathsSettings;

    fn processor_with_temp(dir: &Path) -> AudioProcessor {
        AudioProcessor::new(&PathsSettings {
            models: dir.join("models"),
            output: dir.join("output"),
            temp: dir.join("temp"),
        })
    }

    #[test]
    fn suffix_check_is_case_insensitive() {
        assert!(AudioProcessor::is_supported(Path::new("meeting.WAV")));
        assert!(AudioProcessor::is_supported(Path::new("call.m4a")));
        assert!(!AudioProcessor::is_supported(Path::new("notes.txt")));
        assert!(!AudioProcessor::is_supported(Path::new("no_extension")));
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("*.wav", "audio_converted.wav"));
        assert!(wildcard_match("*_chunk_*.wav", "long_chunk_002.wav"));
        assert!(wildcard_match("?.tmp", "a.tmp"));
        assert!(!wildcard_match("*.wav", "audio.mp3"));
        assert!(!wildcard_match("?.tmp", "ab.tmp"));
        assert!(wildcard_match("*", "anything.at.all"));
    }

    #[test]
    fn chunk_names_are_zero_padded() {
        assert_eq!(chunk_file_name("meeting", 0), "meeting_chunk_000.wav");
        assert_eq!(chunk_file_name("meeting", 42), "meeting_chunk_042.wav");
        assert_eq!(chunk_file_name("meeting", 123), "meeting_chunk_123.wav");
    }

    #[test]
    fn cleanup_missing_temp_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with_temp(dir.path());
        assert_eq!(processor.cleanup_temp(TEMP_PATTERNS), 0);
    }

    #[test]
    fn cleanup_removes_only_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with_temp(dir.path());
        let temp = dir.path().join("temp");
        std::fs::create_dir_all(&temp).unwrap();
        std::fs::write(temp.join("a_converted.wav"), b"x").unwrap();
        std::fs::write(temp.join("b.tmp"), b"x").unwrap();
        std::fs::write(temp.join("keep.srt"), b"x").unwrap();

        assert_eq!(processor.cleanup_temp(TEMP_PATTERNS), 2);
        assert!(temp.join("keep.srt").exists());
        assert!(!temp.join("a_converted.wav").exists());
    }

    #[test]
    fn wav_roundtrip_preserves_mono_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..1600)
            .map(|i| (i as f32 / 1600.0 * std::f32::consts::TAU).sin() * 0.5)
            .collect();
        write_wav_i16(&path, &samples, 16000, 1).unwrap();

        let read = read_wav_f32(&path).unwrap();
        assert_eq!(read.len(), samples.len());
        // 16-bit quantization error stays tiny.
        let max_err = samples
            .iter()
            .zip(&read)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1.0 / 16384.0);
    }

    #[test]
    fn stereo_wav_is_downmixed_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // Left = 0.5, right = -0.5 everywhere; mean must be ~0.
        let interleaved: Vec<f32> = (0..200)
            .flat_map(|_| [0.5f32, -0.5f32])
            .collect();
        write_wav_i16(&path, &interleaved, 16000, 2).unwrap();

        let read = read_wav_f32(&path).unwrap();
        assert_eq!(read.len(), 200);
        assert!(read.iter().all(|s| s.abs() < 1.0 / 16384.0));
    }
}
