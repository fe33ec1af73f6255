//! Audio capture service.
//!
//! Captures microphone input through cpal. The stream callback acts as a
//! producer pushing fixed frames into a bounded queue without ever
//! blocking; a dedicated consumer thread drains the queue into an
//! in-memory buffer and reports the captured duration.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, warn};

use crate::audio::ffmpeg::FfmpegTools;
use crate::audio::processor::write_wav_i16;
use crate::audio::types::InputDevice;
use crate::error::AudioError;
use crate::settings::AudioSettings;

const QUEUE_CAPACITY: usize = 256;
const CONSUMER_POLL: Duration = Duration::from_millis(100);
const CONSUMER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Duration callback fired as frames are drained, with total seconds.
pub type DurationFn = Box<dyn Fn(f64) + Send + 'static>;

/// Microphone recorder with a producer/consumer capture loop.
pub struct AudioRecorder {
    settings: AudioSettings,
    recording: Arc<AtomicBool>,
    stream: Option<cpal::Stream>,
    consumer: Option<std::thread::JoinHandle<()>>,
    done_rx: Option<mpsc::Receiver<()>>,
    buffer: Arc<Mutex<Vec<f32>>>,
}

// The cpal stream handle is not Send on every backend, but the recorder
// confines all stream operations to the owning call sites.
unsafe impl Send for AudioRecorder {}
unsafe impl Sync for AudioRecorder {}

impl AudioRecorder {
    pub fn new(settings: AudioSettings) -> Self {
        Self {
            settings,
            recording: Arc::new(AtomicBool::new(false)),
            stream: None,
            consumer: None,
            done_rx: None,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// List available audio input devices.
    pub fn list_input_devices() -> Result<Vec<InputDevice>, AudioError> {
        let host = cpal::default_host();
        let default_name = host
            .default_input_device()
            .and_then(|d| d.name().ok());

        let devices = host.input_devices().map_err(|e| AudioError::Recording {
            detail: format!("cannot enumerate input devices: {e}"),
        })?;

        let mut result = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = match device.name() {
                Ok(name) => name,
                Err(e) => {
                    warn!("skipping unnamed input device: {e}");
                    continue;
                }
            };
            let config = match device.default_input_config() {
                Ok(config) => config,
                Err(e) => {
                    warn!("skipping device '{name}': {e}");
                    continue;
                }
            };
            result.push(InputDevice {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
            });
        }
        Ok(result)
    }

    /// The system default input device, if any.
    pub fn default_input_device() -> Option<InputDevice> {
        let devices = Self::list_input_devices().ok()?;
        devices
            .iter()
            .find(|d| d.is_default)
            .or_else(|| devices.first())
            .cloned()
    }

    /// Start capturing. Double-start is a warning no-op.
    pub fn start(
        &mut self,
        device_index: Option<usize>,
        on_duration: Option<DurationFn>,
    ) -> Result<(), AudioError> {
        if self.recording.load(Ordering::SeqCst) {
            warn!("Recording already in progress");
            return Ok(());
        }

        let device = Self::select_device(device_index.or(self.settings.input_device))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let config = cpal::StreamConfig {
            channels: self.settings.channels,
            sample_rate: cpal::SampleRate(self.settings.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        if let Ok(default_config) = device.default_input_config() {
            if default_config.sample_format() != cpal::SampleFormat::F32 {
                warn!(
                    "Device '{device_name}' does not default to f32 samples, \
                     attempting the requested config anyway"
                );
            }
        }

        let (frame_tx, frame_rx) = mpsc::sync_channel::<Vec<f32>>(QUEUE_CAPACITY);
        let (done_tx, done_rx) = mpsc::channel::<()>();

        self.buffer.lock().unwrap().clear();
        self.recording.store(true, Ordering::SeqCst);

        // Producer: never blocks the audio callback, drops on overflow.
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    match frame_tx.try_send(data.to_vec()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => warn!("capture queue full, frame dropped"),
                        Err(TrySendError::Disconnected(_)) => {}
                    }
                },
                move |err| error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| AudioError::Recording {
                detail: format!("cannot open input stream: {e}"),
            })?;

        stream.play().map_err(|e| AudioError::Recording {
            detail: format!("cannot start input stream: {e}"),
        })?;
        self.stream = Some(stream);

        // Consumer: drains frames until stopped and the queue is empty.
        let recording = self.recording.clone();
        let buffer = self.buffer.clone();
        let samples_per_second =
            (self.settings.sample_rate as u64 * self.settings.channels as u64).max(1);
        self.consumer = Some(std::thread::spawn(move || {
            let mut total_samples: u64 = 0;
            loop {
                match frame_rx.recv_timeout(CONSUMER_POLL) {
                    Ok(frame) => {
                        total_samples += frame.len() as u64;
                        buffer.lock().unwrap().extend_from_slice(&frame);
                        if let Some(cb) = on_duration.as_ref() {
                            cb(total_samples as f64 / samples_per_second as f64);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if !recording.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            let _ = done_tx.send(());
        }));
        self.done_rx = Some(done_rx);

        info!(
            "Recording started (device={device_name}, rate={})",
            self.settings.sample_rate
        );
        Ok(())
    }

    /// Stop capturing and return the concatenated samples, or `None` when
    /// nothing was recorded.
    pub fn stop(&mut self) -> Option<Vec<f32>> {
        if !self.recording.load(Ordering::SeqCst) {
            warn!("No recording in progress");
            return None;
        }
        self.recording.store(false, Ordering::SeqCst);

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("failed to pause input stream: {e}");
            }
            // Dropping the stream disconnects the producer.
        }

        // Bounded join: the consumer signals completion, then exits.
        let consumer_done = match self.done_rx.take() {
            Some(done_rx) => done_rx.recv_timeout(CONSUMER_JOIN_TIMEOUT).is_ok(),
            None => false,
        };
        if let Some(handle) = self.consumer.take() {
            if consumer_done {
                if handle.join().is_err() {
                    warn!("capture consumer thread panicked");
                }
            } else {
                // Leave the thread detached rather than blocking past the
                // join bound.
                warn!("capture consumer did not finish within 2s");
            }
        }

        let samples = std::mem::take(&mut *self.buffer.lock().unwrap());
        if samples.is_empty() {
            warn!("No audio data recorded");
            return None;
        }

        let duration = samples.len() as f64
            / (self.settings.sample_rate as f64 * self.settings.channels as f64);
        info!("Recording stopped: {duration:.1}s, {} samples", samples.len());
        Some(samples)
    }

    /// Save captured samples to a file. The format defaults to the
    /// configured export format; non-WAV targets are produced by
    /// re-encoding through the external decoder.
    pub async fn save(
        &self,
        samples: &[f32],
        output_path: &Path,
        format: Option<&str>,
    ) -> Result<PathBuf, AudioError> {
        let format = format
            .map(|f| f.to_lowercase())
            .unwrap_or_else(|| self.settings.export_format.to_lowercase());

        let output_path = if output_path.extension().is_none() {
            output_path.with_extension(&format)
        } else {
            output_path.to_path_buf()
        };
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AudioError::Recording {
                detail: format!("cannot create output directory: {e}"),
            })?;
        }

        if format == "wav" {
            write_wav_i16(
                &output_path,
                samples,
                self.settings.sample_rate,
                self.settings.channels,
            )?;
        } else {
            let stem = output_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("recording");
            let staging = output_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(format!(".{stem}.export.wav"));
            write_wav_i16(
                &staging,
                samples,
                self.settings.sample_rate,
                self.settings.channels,
            )?;
            let tools = FfmpegTools::locate()?;
            let result = tools.convert_to_format(&staging, &output_path).await;
            let _ = std::fs::remove_file(&staging);
            result?;
        }

        info!("Recording saved: {}", output_path.display());
        Ok(output_path)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn select_device(index: Option<usize>) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        if let Some(index) = index {
            let mut devices = host.input_devices().map_err(|e| AudioError::Recording {
                detail: format!("cannot enumerate input devices: {e}"),
            })?;
            return devices.nth(index).ok_or_else(|| AudioError::Recording {
                detail: format!("no input device at index {index}"),
            });
        }
        host.default_input_device()
            .ok_or_else(|| AudioError::Recording {
                detail: "no default input device".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_without_start_returns_none() {
        let mut recorder = AudioRecorder::new(AudioSettings::default());
        assert!(!recorder.is_recording());
        assert!(recorder.stop().is_none());
    }

    #[tokio::test]
    async fn save_writes_wav_with_configured_rate() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = AudioRecorder::new(AudioSettings::default());
        let samples: Vec<f32> = (0..3200).map(|i| (i as f32 * 0.01).sin() * 0.3).collect();

        let path = recorder
            .save(&samples, &dir.path().join("meeting"), None)
            .await
            .unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("wav"));

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len() as usize, samples.len());
    }
}
