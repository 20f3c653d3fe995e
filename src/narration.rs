use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One line of narration paired with its spoken duration in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    pub text: String,
    pub duration: f64,
}

impl NarrationSegment {
    pub fn new(text: impl Into<String>, duration: f64) -> Self {
        Self {
            text: text.into(),
            duration,
        }
    }
}

fn is_sentence_end(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

/// Split a script into trimmed, non-empty lines.
pub fn split_lines(script: &str) -> Vec<String> {
    script
        .split('\n')
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Put every sentence on its own line so TTS segments and clip cuts follow sentences.
///
/// A newline is inserted after a sentence-ending character when the next
/// non-whitespace character is neither punctuation nor a newline. The
/// whitespace in between is dropped.
pub fn break_sentences(script: &str) -> String {
    let chars: Vec<char> = script.chars().collect();
    let mut out = String::with_capacity(script.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        out.push(ch);
        i += 1;

        if !is_sentence_end(ch) {
            continue;
        }

        let mut k = i;
        while k < chars.len() && chars[k].is_whitespace() && chars[k] != '\n' {
            k += 1;
        }
        if k < chars.len() && !is_sentence_end(chars[k]) && chars[k] != '\n' {
            out.push('\n');
            i = k;
        }
    }

    out
}

/// Pair script lines with durations.
///
/// Durations that match the line count are used verbatim and `total` is ignored.
/// Otherwise the result always sums to `total`: a shorter duration list keeps its
/// prefix and the unmatched tail shares what is left, anything else is divided
/// evenly. A missing or blank script yields one untitled segment covering `total`.
pub fn segment_script(
    script: Option<&str>,
    durations: Option<&[f64]>,
    total: f64,
) -> Vec<NarrationSegment> {
    let total = total.max(0.0);
    let lines = script.map(split_lines).unwrap_or_default();

    if lines.is_empty() {
        return vec![NarrationSegment::new(String::new(), total)];
    }

    let durations = durations.unwrap_or_default();
    if durations.len() == lines.len() {
        debug!(segments = lines.len(), "using measured segment durations");
        return lines
            .into_iter()
            .zip(durations.iter().copied())
            .map(|(text, duration)| NarrationSegment::new(text, duration.max(0.0)))
            .collect();
    }

    if !durations.is_empty() && durations.len() < lines.len() {
        let prefix: Vec<f64> = durations.iter().map(|d| d.max(0.0)).collect();
        let used: f64 = prefix.iter().sum();
        if used < total {
            warn!(
                lines = lines.len(),
                durations = durations.len(),
                "segment duration count mismatch; sharing the remainder across the tail"
            );
            let tail = lines.len() - prefix.len();
            let share = (total - used) / tail as f64;
            return lines
                .into_iter()
                .enumerate()
                .map(|(i, text)| {
                    let duration = prefix.get(i).copied().unwrap_or(share);
                    NarrationSegment::new(text, duration)
                })
                .collect();
        }
    }

    if !durations.is_empty() {
        warn!(
            lines = lines.len(),
            durations = durations.len(),
            "segment durations unusable; dividing total evenly"
        );
    }

    let share = total / lines.len() as f64;
    lines
        .into_iter()
        .map(|text| NarrationSegment::new(text, share))
        .collect()
}

pub fn total_duration(segments: &[NarrationSegment]) -> f64 {
    segments.iter().map(|s| s.duration).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_division_without_durations() {
        let segments = segment_script(Some("Hello world.\nSee you soon."), None, 4.0);
        assert_eq!(
            segments,
            vec![
                NarrationSegment::new("Hello world.", 2.0),
                NarrationSegment::new("See you soon.", 2.0),
            ]
        );
    }

    #[test]
    fn blank_lines_are_dropped() {
        let segments = segment_script(Some("\n\n  a  \n\n\nb\n   \n"), None, 3.0);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "a");
        assert!((segments[1].duration - 1.5).abs() < 1e-9);
    }

    #[test]
    fn measured_durations_are_verbatim() {
        let segments = segment_script(Some("one\ntwo\nthree"), Some(&[1.2, 0.7, 2.4]), 99.0);
        let got: Vec<f64> = segments.iter().map(|s| s.duration).collect();
        assert_eq!(got, vec![1.2, 0.7, 2.4]);
    }

    #[test]
    fn short_duration_list_shares_remainder() {
        let segments = segment_script(Some("a\nb\nc"), Some(&[1.0]), 5.0);
        let got: Vec<f64> = segments.iter().map(|s| s.duration).collect();
        assert_eq!(got, vec![1.0, 2.0, 2.0]);
        assert!((total_duration(&segments) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn long_duration_list_falls_back_to_equal_split() {
        let segments = segment_script(Some("a\nb"), Some(&[1.0, 1.0, 1.0]), 6.0);
        assert!(segments.iter().all(|s| (s.duration - 3.0).abs() < 1e-9));
    }

    #[test]
    fn oversized_prefix_falls_back_to_equal_split() {
        let segments = segment_script(Some("a\nb\nc"), Some(&[10.0]), 3.0);
        assert!(segments.iter().all(|s| (s.duration - 1.0).abs() < 1e-9));
    }

    #[test]
    fn empty_script_spans_total() {
        assert_eq!(
            segment_script(None, None, 7.5),
            vec![NarrationSegment::new("", 7.5)]
        );
        assert_eq!(
            segment_script(Some("  \n \n"), Some(&[1.0]), 2.0),
            vec![NarrationSegment::new("", 2.0)]
        );
    }

    #[test]
    fn conservation_across_counts() {
        for n in 1..=12 {
            let script: Vec<String> = (0..n).map(|i| format!("line {i}")).collect();
            let segments = segment_script(Some(&script.join("\n")), None, 37.3);
            assert!((total_duration(&segments) - 37.3).abs() < 1e-9, "n={n}");
        }
    }

    #[test]
    fn sentences_get_their_own_lines() {
        assert_eq!(
            break_sentences("Hi there. How are you? Fine!"),
            "Hi there.\nHow are you?\nFine!"
        );
        assert_eq!(break_sentences("Wait... what?!"), "Wait...\nwhat?!");
        assert_eq!(break_sentences("Done.\nNext."), "Done.\nNext.");
        assert_eq!(break_sentences("3.5 stars"), "3.\n5 stars");
    }
}
