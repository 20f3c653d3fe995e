//! Subtitle cue timing: short on-screen captions derived from narration segments
//! or from a speech-to-text transcript.

use crate::api::whisper::{Transcript, TranscriptSegment};
use crate::narration::NarrationSegment;
use serde::{Deserialize, Serialize};

/// Captions longer than this are broken into sentences and then word groups.
pub const MAX_CUE_CHARS: usize = 20;
/// Captions longer than this get a line break near the middle.
pub const LINE_BREAK_CHARS: usize = 15;
/// Transcript captions are wrapped at this many characters.
pub const MAX_TRANSCRIPT_CUE_CHARS: usize = 70;
pub const DEFAULT_TRANSCRIPT_SECONDS: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Cue {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn visible_len(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

fn is_sentence_end(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

/// Sentences as runs of text followed by their terminating punctuation.
/// Punctuation with no text in front of it is dropped.
fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_terminator = false;

    for ch in text.chars() {
        if is_sentence_end(ch) {
            if current.is_empty() {
                continue;
            }
            current.push(ch);
            in_terminator = true;
        } else {
            if in_terminator {
                out.push(std::mem::take(&mut current));
                in_terminator = false;
            }
            current.push(ch);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }

    if out.is_empty() {
        out.push(text.to_string());
    }
    out
}

/// Greedy word grouping. The length test ignores the joining space.
fn group_words(chunk: &str, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for word in chunk.split_whitespace() {
        if char_len(&current) + char_len(word) > limit {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Caption-sized pieces of one narration line.
pub fn chunk_text(text: &str) -> Vec<String> {
    let text = text.trim();
    if char_len(text) <= MAX_CUE_CHARS && !text.chars().any(is_sentence_end) {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    for sentence in split_sentences(text) {
        let sentence = sentence.trim();
        if char_len(sentence) > MAX_CUE_CHARS {
            chunks.extend(group_words(sentence, MAX_CUE_CHARS));
        } else if !sentence.is_empty() {
            chunks.push(sentence.to_string());
        }
    }

    if chunks.is_empty() {
        chunks.push(text.to_string());
    }
    chunks
}

/// Break a caption over two lines at the last space at or before its midpoint.
pub fn balance_lines(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= LINE_BREAK_CHARS || text.contains('\n') {
        return text.to_string();
    }

    let mid = chars.len() / 2;
    match chars[..=mid].iter().rposition(|c| *c == ' ') {
        Some(at) => {
            let head: String = chars[..at].iter().collect();
            let tail: String = chars[at + 1..].iter().collect();
            format!("{head}\n{tail}")
        }
        None => text.to_string(),
    }
}

/// Contiguous cues covering every segment in order.
///
/// Each segment's duration is spread over its chunks in proportion to their
/// non-whitespace characters; the last chunk takes whatever is left so the
/// cue end of every segment lands exactly on the running total.
pub fn build_cues(segments: &[NarrationSegment]) -> Vec<Cue> {
    let mut cues = Vec::new();
    let mut cursor = 0.0_f64;

    for segment in segments {
        let text = segment.text.trim();
        let segment_end = cursor + segment.duration;

        let chunks = chunk_text(text);
        let total_len = visible_len(text).max(1) as f64;
        let last = chunks.len() - 1;

        for (j, chunk) in chunks.iter().enumerate() {
            let end = if j == last {
                segment_end
            } else {
                cursor + visible_len(chunk) as f64 / total_len * segment.duration
            };
            cues.push(Cue {
                index: cues.len() + 1,
                start: cursor,
                end,
                text: balance_lines(chunk),
            });
            cursor = end;
        }
        cursor = segment_end;
    }

    cues
}

/// Word-wrap into pieces of at most `limit` characters counting the joining space.
fn wrap_words(text: &str, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && char_len(&current) + char_len(word) + 1 > limit {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn spread(cues: &mut Vec<Cue>, pieces: Vec<String>, start: f64, end: f64) {
    let step = (end - start) / pieces.len() as f64;
    for (i, piece) in pieces.into_iter().enumerate() {
        cues.push(Cue {
            index: cues.len() + 1,
            start: start + i as f64 * step,
            end: start + (i + 1) as f64 * step,
            text: piece,
        });
    }
}

/// Cues from a speech-to-text result. Long segments share their span equally
/// between wrapped pieces; without segments the whole text is spread over the
/// transcript duration.
pub fn transcript_cues(transcript: &Transcript) -> Vec<Cue> {
    let mut cues = Vec::new();

    if !transcript.segments.is_empty() {
        for TranscriptSegment { start, end, text } in &transcript.segments {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if char_len(text) > MAX_TRANSCRIPT_CUE_CHARS {
                spread(&mut cues, wrap_words(text, MAX_TRANSCRIPT_CUE_CHARS), *start, *end);
            } else {
                cues.push(Cue {
                    index: cues.len() + 1,
                    start: *start,
                    end: *end,
                    text: text.to_string(),
                });
            }
        }
        return cues;
    }

    let duration = transcript
        .duration
        .filter(|d| *d > 0.0)
        .unwrap_or(DEFAULT_TRANSCRIPT_SECONDS);
    let pieces = wrap_words(&transcript.text, MAX_TRANSCRIPT_CUE_CHARS);
    if !pieces.is_empty() {
        spread(&mut cues, pieces, 0.0, duration);
    }
    cues
}
