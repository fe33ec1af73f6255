//! Fusion: assign diarization speaker labels to transcription segments.

use crate::asr::types::TranscriptionResult;
use crate::diarization::types::DiarizationResult;

/// Assign a speaker to each transcription segment, in place.
///
/// Primary rule: the speaker with the dominant total overlap across the
/// segment span. Fallback: the speaker whose turn contains the segment
/// midpoint. Segments matching neither keep `speaker = None`. Empty
/// diarization input leaves every speaker unset.
pub fn assign_speakers(transcription: &mut TranscriptionResult, diarization: &DiarizationResult) {
    for segment in &mut transcription.segments {
        let speaker = diarization
            .get_speaker_for_range(segment.start, segment.end)
            .or_else(|| diarization.get_speaker_at((segment.start + segment.end) / 2.0));
        segment.speaker = speaker.map(|s| s.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::types::TranscriptionSegment;
    use crate::diarization::types::SpeakerTurn;

    fn segment(start: f64, end: f64) -> TranscriptionSegment {
        TranscriptionSegment {
            start,
            end,
            text: "...".to_string(),
            words: Vec::new(),
            confidence: 0.9,
            speaker: None,
        }
    }

    fn transcription(segments: Vec<TranscriptionSegment>) -> TranscriptionResult {
        TranscriptionResult {
            segments,
            language: "en".to_string(),
            language_probability: 0.99,
            duration: 10.0,
        }
    }

    fn turn(start: f64, end: f64, speaker: &str) -> SpeakerTurn {
        SpeakerTurn {
            start,
            end,
            speaker: speaker.to_string(),
        }
    }

    #[test]
    fn dominant_overlap_wins() {
        let mut t = transcription(vec![segment(0.0, 3.0)]);
        let d = DiarizationResult::from_turns(vec![
            turn(0.0, 1.0, "SPEAKER_00"),
            turn(1.0, 3.0, "SPEAKER_01"),
        ]);
        assign_speakers(&mut t, &d);
        // 2.0s of overlap beats 1.0s.
        assert_eq!(t.segments[0].speaker.as_deref(), Some("SPEAKER_01"));
    }

    #[test]
    fn partial_overlaps_are_compared_by_total() {
        let mut t = transcription(vec![segment(2.5, 4.0)]);
        let d = DiarizationResult::from_turns(vec![
            turn(0.0, 3.0, "SPEAKER_00"),
            turn(3.0, 5.0, "SPEAKER_01"),
        ]);
        assign_speakers(&mut t, &d);
        // 1.0s vs 0.5s.
        assert_eq!(t.segments[0].speaker.as_deref(), Some("SPEAKER_01"));
    }

    #[test]
    fn disjoint_segment_stays_unassigned() {
        let mut t = transcription(vec![segment(10.0, 11.0)]);
        let d = DiarizationResult::from_turns(vec![turn(0.0, 2.0, "SPEAKER_00")]);
        assign_speakers(&mut t, &d);
        assert_eq!(t.segments[0].speaker, None);
    }

    #[test]
    fn empty_diarization_leaves_all_speakers_unset() {
        let mut t = transcription(vec![segment(0.0, 1.0), segment(1.0, 2.0)]);
        let d = DiarizationResult::from_turns(Vec::new());
        assign_speakers(&mut t, &d);
        assert!(t.segments.iter().all(|s| s.speaker.is_none()));
    }

    #[test]
    fn midpoint_fallback_covers_zero_overlap() {
        // Segment of zero length on a turn boundary: no overlap, midpoint
        // lookup resolves it to the earliest containing turn.
        let mut t = transcription(vec![segment(3.0, 3.0)]);
        let d = DiarizationResult::from_turns(vec![
            turn(0.0, 3.0, "SPEAKER_00"),
            turn(3.0, 5.0, "SPEAKER_01"),
        ]);
        assign_speakers(&mut t, &d);
        assert_eq!(t.segments[0].speaker.as_deref(), Some("SPEAKER_00"));
    }

    #[test]
    fn assigned_speakers_stay_within_diarization_set() {
        let mut t = transcription(vec![
            segment(0.0, 1.0),
            segment(1.0, 2.0),
            segment(8.0, 9.0),
        ]);
        let d = DiarizationResult::from_turns(vec![
            turn(0.0, 1.5, "SPEAKER_00"),
            turn(1.5, 3.0, "SPEAKER_01"),
        ]);
        assign_speakers(&mut t, &d);

        let known = d.speakers();
        for seg in &t.segments {
            if let Some(speaker) = &seg.speaker {
                assert!(known.contains(&speaker.as_str()));
            }
        }
    }

    #[test]
    fn fusion_preserves_segment_order() {
        let mut t = transcription(vec![segment(0.0, 1.0), segment(1.0, 2.0), segment(2.0, 3.0)]);
        let d = DiarizationResult::from_turns(vec![turn(0.0, 3.0, "SPEAKER_00")]);
        assign_speakers(&mut t, &d);
        let starts: Vec<f64> = t.segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0.0, 1.0, 2.0]);
        assert!(t.segments.iter().all(|s| s.speaker.as_deref() == Some("SPEAKER_00")));
    }
}
