//! Transcript rendering: plain text and SRT subtitles.
//!
//! Pure functions of the result and the formatting flags.

use crate::asr::types::TranscriptionResult;

impl TranscriptionResult {
    /// Render one line per segment: optional `[SPEAKER_NN] ` prefix,
    /// optional `[MM:SS - MM:SS] ` span, then the trimmed text.
    pub fn to_text(&self, include_timestamps: bool, include_speakers: bool) -> String {
        let mut lines = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let mut prefix = String::new();
            if include_speakers {
                if let Some(speaker) = &segment.speaker {
                    prefix.push_str(&format!("[{speaker}] "));
                }
            }
            if include_timestamps {
                prefix.push_str(&format!(
                    "[{} - {}] ",
                    format_time(segment.start),
                    format_time(segment.end)
                ));
            }
            lines.push(format!("{prefix}{}", segment.text.trim()));
        }
        lines.join("\n")
    }

    /// Render SRT-conformant subtitle blocks, counting from 1. A speaker
    /// prefix is always included when the segment has one.
    pub fn to_srt(&self) -> String {
        let mut lines = Vec::with_capacity(self.segments.len() * 4);
        for (index, segment) in self.segments.iter().enumerate() {
            let mut text = segment.text.trim().to_string();
            if let Some(speaker) = &segment.speaker {
                text = format!("[{speaker}] {text}");
            }
            lines.push((index + 1).to_string());
            lines.push(format!(
                "{} --> {}",
                format_srt_time(segment.start),
                format_srt_time(segment.end)
            ));
            lines.push(text);
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

/// `MM:SS` from whole seconds.
pub fn format_time(seconds: f64) -> String {
    let total = seconds as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// `HH:MM:SS,mmm` with milliseconds floored.
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).floor() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::types::TranscriptionSegment;
    use rstest::rstest;

    fn segment(start: f64, end: f64, text: &str, speaker: Option<&str>) -> TranscriptionSegment {
        TranscriptionSegment {
            start,
            end,
            text: text.to_string(),
            words: Vec::new(),
            confidence: 0.9,
            speaker: speaker.map(|s| s.to_string()),
        }
    }

    fn two_segment_result() -> TranscriptionResult {
        TranscriptionResult {
            segments: vec![
                segment(0.0, 2.0, "Hello", Some("A")),
                segment(2.0, 4.0, "World", Some("B")),
            ],
            language: "en".to_string(),
            language_probability: 0.98,
            duration: 4.0,
        }
    }

    #[rstest]
    #[case(0.0, "00:00")]
    #[case(2.0, "00:02")]
    #[case(65.4, "01:05")]
    #[case(3601.0, "60:01")]
    fn minute_second_formatting(#[case] seconds: f64, #[case] expected: &str) {
        assert_eq!(format_time(seconds), expected);
    }

    #[rstest]
    #[case(0.0, "00:00:00,000")]
    #[case(2.0, "00:00:02,000")]
    #[case(3661.5, "01:01:01,500")]
    #[case(1.2349, "00:00:01,234")]
    fn srt_time_floors_milliseconds(#[case] seconds: f64, #[case] expected: &str) {
        assert_eq!(format_srt_time(seconds), expected);
    }

    #[test]
    fn text_with_speakers_and_timestamps_is_exact() {
        let result = two_segment_result();
        assert_eq!(
            result.to_text(true, true),
            "[A] [00:00 - 00:02] Hello\n[B] [00:02 - 00:04] World"
        );
    }

    #[test]
    fn text_flags_drop_prefixes() {
        let result = two_segment_result();
        assert_eq!(result.to_text(false, false), "Hello\nWorld");
        assert_eq!(result.to_text(false, true), "[A] Hello\n[B] World");
        assert_eq!(
            result.to_text(true, false),
            "[00:00 - 00:02] Hello\n[00:02 - 00:04] World"
        );
    }

    #[test]
    fn unassigned_speaker_leaves_no_prefix() {
        let result = TranscriptionResult {
            segments: vec![segment(0.0, 1.0, "Solo", None)],
            language: "en".to_string(),
            language_probability: 1.0,
            duration: 1.0,
        };
        assert_eq!(result.to_text(false, true), "Solo");
    }

    #[test]
    fn srt_blocks_are_numbered_and_timed() {
        let result = two_segment_result();
        let srt = result.to_srt();
        let expected = "1\n00:00:00,000 --> 00:00:02,000\n[A] Hello\n\n\
                        2\n00:00:02,000 --> 00:00:04,000\n[B] World\n";
        assert_eq!(srt, expected);
    }

    #[test]
    fn srt_parses_as_valid_blocks() {
        let result = two_segment_result();
        let srt = result.to_srt();
        let blocks: Vec<&str> = srt.trim_end().split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        for (i, block) in blocks.iter().enumerate() {
            let lines: Vec<&str> = block.lines().collect();
            assert_eq!(lines[0], (i + 1).to_string());
            assert!(lines[1].contains(" --> "));
            assert!(!lines[2].is_empty());
        }
    }

    #[test]
    fn renderers_are_pure() {
        let result = two_segment_result();
        assert_eq!(result.to_srt(), result.to_srt());
        assert_eq!(result.to_text(true, true), result.to_text(true, true));
    }
}
