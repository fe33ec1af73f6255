//! Sortformer diarization back end over the ONNX runtime.
//!
//! Runs the 4-speaker Sortformer export on a canonical mono 16 kHz WAV
//! and turns the frame-level activity matrix into textual turn lines of
//! the form `"<start> <end> speaker_<k>"`, the same surface the upstream
//! checkpoint emits.

use std::path::Path;
use std::sync::Arc;

use ndarray::{Array2, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use tracing::{debug, info};

use crate::audio::processor::read_wav_f32;
use crate::audio::WHISPER_SAMPLE_RATE;
use crate::error::DiarizationError;

/// Upper bound on detected speakers, fixed by the model head.
pub const MAX_SPEAKERS: usize = 4;

/// Frame activity threshold: a speaker is active when the sigmoid output
/// exceeds this value.
const ACTIVITY_THRESHOLD: f32 = 0.5;

/// Gaps shorter than this are bridged into one turn.
const MERGE_GAP_SECONDS: f64 = 0.25;

/// Turns shorter than this are dropped as spurious.
const MIN_TURN_SECONDS: f64 = 0.2;

/// Loaded Sortformer session.
pub struct SortformerModel {
    session: Session,
    _environment: Arc<Environment>,
}

impl SortformerModel {
    /// Load the ONNX artifact with a bounded intra-op thread pool.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DiarizationError> {
        let failed = |detail: String| DiarizationError::Failed { detail };

        info!("Loading Sortformer model: {}", model_path.display());
        let environment = Arc::new(
            Environment::builder()
                .with_name("sortformer")
                .build()
                .map_err(|e| failed(format!("onnx environment: {e}")))?,
        );
        let session = SessionBuilder::new(&environment)
            .map_err(|e| failed(format!("session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| failed(format!("optimization level: {e}")))?
            .with_intra_threads(intra_threads as i16)
            .map_err(|e| failed(format!("thread configuration: {e}")))?
            .with_model_from_file(model_path)
            .map_err(|e| failed(format!("model file: {e}")))?;

        info!("Sortformer model loaded");
        Ok(Self {
            session,
            _environment: environment,
        })
    }

    /// Diarize a canonical WAV file. Returns turn lines sorted by start.
    ///
    /// The input tensor's leading dimension is the batch, fixed at 1.
    pub fn diarize(&self, wav_path: &Path) -> Result<Vec<String>, DiarizationError> {
        let failed = |detail: String| DiarizationError::Failed { detail };

        let samples = read_wav_f32(wav_path).map_err(|e| failed(e.to_string()))?;
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let duration = samples.len() as f64 / WHISPER_SAMPLE_RATE as f64;

        let sample_count = samples.len();
        let input = Array2::from_shape_vec((1, sample_count), samples)
            .map_err(|e| failed(format!("input tensor: {e}")))?;
        let input = CowArray::from(input.into_dyn());
        let value = Value::from_array(self.session.allocator(), &input)
            .map_err(|e| failed(format!("input binding: {e}")))?;

        let outputs = self
            .session
            .run(vec![value])
            .map_err(|e| failed(format!("inference: {e}")))?;
        if outputs.is_empty() {
            return Err(failed("model produced no outputs".to_string()));
        }
        let activity = outputs[0]
            .try_extract::<f32>()
            .map_err(|e| failed(format!("output tensor: {e}")))?;
        let activity = activity.view();

        let shape = activity.shape().to_vec();
        if shape.len() != 3 || shape[1] == 0 {
            return Err(failed(format!("unexpected output shape {shape:?}")));
        }
        let frames = shape[1];
        let speakers = shape[2].min(MAX_SPEAKERS);
        let frame_seconds = duration / frames as f64;
        debug!("Sortformer output: {frames} frames x {speakers} speakers, {frame_seconds:.3}s/frame");

        let mut turns: Vec<(f64, f64, usize)> = Vec::new();
        for speaker in 0..speakers {
            let mut active_since: Option<f64> = None;
            let mut last_active_end = 0.0f64;

            for frame in 0..frames {
                let time = frame as f64 * frame_seconds;
                let is_active = activity[[0, frame, speaker]] >= ACTIVITY_THRESHOLD;

                match (is_active, active_since) {
                    (true, None) => {
                        active_since = Some(time);
                        last_active_end = time + frame_seconds;
                    }
                    (true, Some(_)) => {
                        last_active_end = time + frame_seconds;
                    }
                    (false, Some(start)) => {
                        if time - last_active_end >= MERGE_GAP_SECONDS {
                            push_turn(&mut turns, start, last_active_end, speaker);
                            active_since = None;
                        }
                    }
                    (false, None) => {}
                }
            }
            if let Some(start) = active_since {
                push_turn(&mut turns, start, last_active_end.min(duration), speaker);
            }
        }

        turns.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(turns
            .into_iter()
            .map(|(start, end, speaker)| format!("{start:.3} {end:.3} speaker_{speaker}"))
            .collect())
    }
}

fn push_turn(turns: &mut Vec<(f64, f64, usize)>, start: f64, end: f64, speaker: usize) {
    if end - start >= MIN_TURN_SECONDS {
        turns.push((start, end, speaker));
    }
}
