//! Speaker diarization type definitions
//!
//! Turns, results and the timeline queries the fusion step relies on.

use serde::{Deserialize, Serialize};

/// A maximal interval during which one speaker is active.
///
/// Invariant: `start < end`; `speaker` is a normalized `SPEAKER_NN`
/// label. Turns may overlap when the model asserts simultaneous speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerTurn {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

/// Diarization output: who spoke when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiarizationResult {
    pub turns: Vec<SpeakerTurn>,
    pub speaker_count: usize,
}

impl DiarizationResult {
    /// Build a result, deriving the distinct speaker count.
    pub fn from_turns(turns: Vec<SpeakerTurn>) -> Self {
        let mut seen: Vec<&str> = Vec::new();
        for turn in &turns {
            if !seen.contains(&turn.speaker.as_str()) {
                seen.push(&turn.speaker);
            }
        }
        let speaker_count = seen.len();
        Self {
            turns,
            speaker_count,
        }
    }

    /// Distinct speakers in first-occurrence order.
    pub fn speakers(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for turn in &self.turns {
            if !seen.contains(&turn.speaker.as_str()) {
                seen.push(&turn.speaker);
            }
        }
        seen
    }

    /// Speaker active at an instant. Closed on both ends; a point on a
    /// boundary belongs to the earliest matching turn.
    pub fn get_speaker_at(&self, time: f64) -> Option<&str> {
        self.turns
            .iter()
            .find(|turn| turn.start <= time && time <= turn.end)
            .map(|turn| turn.speaker.as_str())
    }

    /// Speaker with the largest total overlap over `[start, end]`.
    /// Ties break toward the speaker seen first in the turn sequence.
    pub fn get_speaker_for_range(&self, start: f64, end: f64) -> Option<&str> {
        let mut overlaps: Vec<(&str, f64)> = Vec::new();

        for turn in &self.turns {
            let overlap_start = start.max(turn.start);
            let overlap_end = end.min(turn.end);
            if overlap_start < overlap_end {
                let duration = overlap_end - overlap_start;
                match overlaps.iter_mut().find(|(s, _)| *s == turn.speaker) {
                    Some((_, total)) => *total += duration,
                    None => overlaps.push((&turn.speaker, duration)),
                }
            }
        }

        let mut best: Option<(&str, f64)> = None;
        for (speaker, total) in overlaps {
            match best {
                Some((_, best_total)) if total <= best_total => {}
                _ => best = Some((speaker, total)),
            }
        }
        best.map(|(speaker, _)| speaker)
    }
}
