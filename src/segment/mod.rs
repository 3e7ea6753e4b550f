//! Sentence segmentation
//!
//! Splits article text into paragraphs of sentences with a global sentence
//! index. The boundary rule is a fast heuristic, not NLP:
//!
//! - a run of terminators (`。！？!?.…`) followed by one whitespace char, or a
//!   bare newline, is a candidate boundary
//! - a candidate is merged back into the current sentence when the text
//!   before it ends in a known abbreviation **and** the next word starts
//!   lowercase (capitalized continuations are accepted as boundaries)
//! - paragraphs are separated by two or more newlines; blank paragraphs are
//!   dropped
//!
//! Every [`Sentence`] records the char range of its trimmed text inside the
//! normalized input, which is what lets the renderer reproduce the exact
//! flat text and keep backend offsets valid.

pub mod abbreviations;

pub use abbreviations::{AbbreviationChecker, ABBREVIATIONS};

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::ops::Range;
use tracing::debug;

use crate::types::{Paragraph, Sentence};

/// Sentence-final punctuation
pub const TERMINATORS: &[char] = &['。', '！', '？', '!', '?', '.', '…'];

/// Chars of context inspected for an abbreviation before a boundary
const ABBREVIATION_WINDOW: usize = 12;

static LINE_ENDING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r\n?").expect("Valid line ending regex"));

/// Collapse `\r\n` and lone `\r` into `\n`
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    LINE_ENDING.replace_all(text, "\n")
}

/// Segment article text into paragraphs of globally indexed sentences
///
/// Spans refer to the line-ending-normalized text.
pub fn segment(text: &str) -> Vec<Paragraph> {
    let normalized = normalize_line_endings(text);
    let chars: Vec<char> = normalized.chars().collect();

    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut next_index = 0;

    for range in paragraph_ranges(&chars) {
        let spans = sentence_ranges(&chars, range);
        if spans.is_empty() {
            continue;
        }

        let paragraph_index = paragraphs.len();
        let sentences = spans
            .into_iter()
            .map(|span| {
                let sentence = Sentence {
                    index: next_index,
                    text: chars[span.clone()].iter().collect(),
                    paragraph_index,
                    span,
                };
                next_index += 1;
                sentence
            })
            .collect();

        paragraphs.push(Paragraph {
            index: paragraph_index,
            sentences,
        });
    }

    debug!(
        paragraphs = paragraphs.len(),
        sentences = next_index,
        "Segmented article"
    );
    paragraphs
}

/// Flat, ordered sentence list
pub fn sentences(text: &str) -> Vec<Sentence> {
    segment(text)
        .into_iter()
        .flat_map(|p| p.sentences)
        .collect()
}

/// Text plus layout for a backend-provided sentence list
#[derive(Debug, Clone)]
pub struct BackendLayout {
    /// Synthetic flat text the layout spans refer to
    pub text: String,
    pub paragraphs: Vec<Paragraph>,
}

/// Re-key a backend sentence list
///
/// Entry `i` becomes sentence `i`, so indices stay contiguous and backend
/// `sentence_index` keys stay valid. A paragraph is closed after every
/// `per_paragraph` list entries. Whitespace-only entries become empty
/// sentences with an empty span and contribute no text.
pub fn layout_backend_sentences(list: &[String], per_paragraph: usize) -> BackendLayout {
    let per_paragraph = per_paragraph.max(1);
    let mut text = String::new();
    let mut cursor = 0usize;
    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut current: Vec<Sentence> = Vec::new();

    let flush = |current: &mut Vec<Sentence>, paragraphs: &mut Vec<Paragraph>| {
        if !current.is_empty() {
            paragraphs.push(Paragraph {
                index: paragraphs.len(),
                sentences: std::mem::take(current),
            });
        }
    };

    for (index, raw) in list.iter().enumerate() {
        let trimmed = raw.trim();
        if current.is_empty() && !paragraphs.is_empty() {
            text.push_str("\n\n");
            cursor += 2;
        }
        let len = trimmed.chars().count();
        current.push(Sentence {
            index,
            text: trimmed.to_string(),
            paragraph_index: paragraphs.len(),
            span: cursor..cursor + len,
        });
        if len > 0 {
            text.push_str(trimmed);
            text.push(' ');
            cursor += len + 1;
        }

        if (index + 1) % per_paragraph == 0 {
            flush(&mut current, &mut paragraphs);
        }
    }
    flush(&mut current, &mut paragraphs);

    BackendLayout { text, paragraphs }
}

/// Char ranges of paragraphs, split on runs of two or more newlines
fn paragraph_ranges(chars: &[char]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '\n' {
            let mut j = i;
            while j < chars.len() && chars[j] == '\n' {
                j += 1;
            }
            if j - i >= 2 {
                ranges.push(start..i);
                start = j;
            }
            i = j;
        } else {
            i += 1;
        }
    }
    ranges.push(start..chars.len());
    ranges
}

/// Trimmed sentence ranges inside one paragraph
fn sentence_ranges(chars: &[char], paragraph: Range<usize>) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = paragraph.start;
    let mut i = paragraph.start;

    while i < paragraph.end {
        let c = chars[i];
        let boundary_end = if c == '\n' {
            Some(i + 1)
        } else if TERMINATORS.contains(&c) {
            let mut j = i;
            while j < paragraph.end && TERMINATORS.contains(&chars[j]) {
                j += 1;
            }
            if j < paragraph.end && chars[j].is_whitespace() {
                Some(j + 1)
            } else {
                i = j;
                continue;
            }
        } else {
            None
        };

        let Some(end) = boundary_end else {
            i += 1;
            continue;
        };

        if is_sentence_end(chars, start, end, paragraph.end) {
            if let Some(trimmed) = trim_range(chars, start..end) {
                out.push(trimmed);
                start = end;
            }
        }
        i = end;
    }

    if let Some(trimmed) = trim_range(chars, start..paragraph.end) {
        out.push(trimmed);
    }
    out
}

/// Decide whether a candidate boundary ending at `end` closes the sentence
fn is_sentence_end(chars: &[char], start: usize, end: usize, limit: usize) -> bool {
    if chars[end - 1] == '\n' {
        return true;
    }

    let window_start = start.max(end.saturating_sub(ABBREVIATION_WINDOW));
    let tail: String = chars[window_start..end].iter().collect();
    if !AbbreviationChecker::ends_with_abbreviation(&tail) {
        return true;
    }

    let next = chars[end..limit].iter().find(|c| !c.is_whitespace());
    !next.is_some_and(|c| c.is_lowercase())
}

fn trim_range(chars: &[char], range: Range<usize>) -> Option<Range<usize>> {
    let mut start = range.start;
    let mut end = range.end;
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    (start < end).then_some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(paragraphs: &[Paragraph]) -> Vec<String> {
        paragraphs
            .iter()
            .flat_map(|p| p.sentences.iter().map(|s| s.text.clone()))
            .collect()
    }

    #[test]
    fn test_basic_english() {
        let paragraphs = segment("The sky is blue. Grass is green! Is it? Yes.");
        assert_eq!(
            texts(&paragraphs),
            vec!["The sky is blue.", "Grass is green!", "Is it?", "Yes."]
        );
    }

    #[test]
    fn test_capitalized_after_abbreviation_still_splits() {
        // The heuristic only merges when the continuation is lowercase.
        let paragraphs = segment("Dr. Smith went home. He arrived late.");
        assert_eq!(
            texts(&paragraphs),
            vec!["Dr.", "Smith went home.", "He arrived late."]
        );
    }

    #[test]
    fn test_lowercase_after_abbreviation_merges() {
        let paragraphs = segment("Bring fruit, e.g. apples and pears. Then leave.");
        assert_eq!(
            texts(&paragraphs),
            vec!["Bring fruit, e.g. apples and pears.", "Then leave."]
        );
    }

    #[test]
    fn test_cjk_terminators_need_following_whitespace() {
        let paragraphs = segment("今天下雨了。 我们待在家里！\n明天呢？");
        assert_eq!(
            texts(&paragraphs),
            vec!["今天下雨了。", "我们待在家里！", "明天呢？"]
        );
    }

    #[test]
    fn test_terminator_runs_stay_together() {
        let paragraphs = segment("Really?! Yes... fine.");
        assert_eq!(texts(&paragraphs), vec!["Really?!", "Yes...", "fine."]);
    }

    #[test]
    fn test_paragraphs_and_global_indices() {
        let text = "First one. Second one.\n\n\n   \n\nThird one.\n\nFourth";
        let paragraphs = segment(text);
        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[1].index, 1);
        assert_eq!(paragraphs[1].sentences[0].index, 2);
        assert_eq!(paragraphs[1].sentences[0].paragraph_index, 1);
        assert_eq!(paragraphs[2].sentences[0].text, "Fourth");
        assert_eq!(paragraphs[2].sentences[0].index, 3);
    }

    #[test]
    fn test_no_punctuation_is_one_sentence() {
        let paragraphs = segment("  just a fragment without an ending  ");
        assert_eq!(texts(&paragraphs), vec!["just a fragment without an ending"]);
    }

    #[test]
    fn test_single_newline_is_boundary() {
        let paragraphs = segment("line one\nline two");
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(texts(&paragraphs), vec!["line one", "line two"]);
    }

    #[test]
    fn test_crlf_normalized() {
        let paragraphs = segment("One.\r\n\r\nTwo.");
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[1].sentences[0].span, 6..10);
    }

    #[test]
    fn test_spans_point_into_normalized_text() {
        let text = "Alpha beta. 伽马 delta!\n\nEpsilon.";
        for sentence in sentences(text) {
            let slice: String = text
                .chars()
                .skip(sentence.span.start)
                .take(sentence.span.len())
                .collect();
            assert_eq!(slice, sentence.text);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(segment("").is_empty());
        assert!(segment("\n\n   \n\n").is_empty());
    }

    #[test]
    fn test_backend_layout_rekeys_and_groups() {
        let list: Vec<String> = (0..12).map(|i| format!("Sentence {}.", i)).collect();
        let layout = layout_backend_sentences(&list, 10);
        assert_eq!(layout.paragraphs.len(), 2);
        assert_eq!(layout.paragraphs[0].sentences.len(), 10);
        assert_eq!(layout.paragraphs[1].sentences[0].index, 10);
        for sentence in layout.paragraphs.iter().flat_map(|p| &p.sentences) {
            let slice: String = layout
                .text
                .chars()
                .skip(sentence.span.start)
                .take(sentence.span.len())
                .collect();
            assert_eq!(slice, sentence.text);
        }
    }

    #[test]
    fn test_backend_layout_keeps_blank_entries() {
        let list = vec!["A.".to_string(), "   ".to_string(), "C.".to_string()];
        let layout = layout_backend_sentences(&list, 10);
        let sentences = &layout.paragraphs[0].sentences;
        let indices: Vec<usize> = sentences.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        assert_eq!(sentences[1].text, "");
        assert!(sentences[1].span.is_empty());
        assert_eq!(sentences[1].span.start, sentences[0].span.end + 1);
        assert_eq!(layout.text, "A. C. ");
    }

    #[test]
    fn test_backend_layout_blank_paragraph_still_counts() {
        let list = vec!["A.".to_string(), "".to_string(), "C.".to_string()];
        let layout = layout_backend_sentences(&list, 1);
        assert_eq!(layout.paragraphs.len(), 3);
        assert_eq!(layout.paragraphs[1].sentences[0].index, 1);
        assert_eq!(layout.paragraphs[2].sentences[0].text, "C.");
        assert_eq!(layout.text, "A. \n\n\n\nC. ");
    }
}
