//! Render pass: segmented text → document with sentence anchors
//!
//! The whitespace between sentences and between paragraphs is kept as gap
//! text leaves, so a fresh render's flat text equals the source text and
//! backend offsets computed against that text stay valid.
//!
//! Markdown articles are flattened first; the flat text is the markdown's
//! visible text and inline markup is rebuilt as `Inline` nodes inside each
//! sentence anchor.

use std::ops::Range;
use tracing::debug;

use super::markdown::{self, InlineSpan};
use super::{Document, NodeId, NodeKind};
use crate::error::Result;
use crate::segment::{layout_backend_sentences, normalize_line_endings, segment};
use crate::types::Paragraph;

/// Output of one render pass
#[derive(Debug, Clone)]
pub struct Rendered {
    pub document: Document,
    pub paragraphs: Vec<Paragraph>,
    /// Flat text the paragraph spans refer to
    pub text: String,
}

impl Rendered {
    pub fn sentence_count(&self) -> usize {
        self.paragraphs.iter().map(|p| p.sentences.len()).sum()
    }
}

/// Segment and render raw article text
///
/// Text that looks like markdown is rendered to its visible text before
/// segmentation, so anchors hold what a reader sees.
pub fn render_article(text: &str) -> Result<Rendered> {
    let normalized = normalize_line_endings(text).into_owned();
    let (flat, inlines) = if markdown::is_markdown(&normalized) {
        let flattened = markdown::flatten(&normalized)?;
        debug!(
            source_len = normalized.len(),
            inlines = flattened.inlines.len(),
            "Rendering markdown article"
        );
        (flattened.text, flattened.inlines)
    } else {
        (normalized, Vec::new())
    };

    let paragraphs = segment(&flat);
    let document = render_with_inlines(&flat, &paragraphs, &inlines)?;
    Ok(Rendered {
        document,
        paragraphs,
        text: flat,
    })
}

/// Render a backend-provided sentence list, replacing local segmentation
///
/// List entry `i` becomes anchor `i`; blank entries get an empty anchor.
pub fn render_backend_sentences(sentences: &[String], per_paragraph: usize) -> Result<Rendered> {
    let layout = layout_backend_sentences(sentences, per_paragraph);
    let document = render_paragraphs(&layout.text, &layout.paragraphs)?;
    debug!(
        sentences = sentences.len(),
        paragraphs = layout.paragraphs.len(),
        "Rendered backend sentence list"
    );
    Ok(Rendered {
        document,
        paragraphs: layout.paragraphs,
        text: layout.text,
    })
}

/// Build a document from a paragraph layout over `text`
pub fn render_paragraphs(text: &str, paragraphs: &[Paragraph]) -> Result<Document> {
    render_with_inlines(text, paragraphs, &[])
}

fn render_with_inlines(
    text: &str,
    paragraphs: &[Paragraph],
    inlines: &[InlineSpan],
) -> Result<Document> {
    let chars: Vec<char> = text.chars().collect();
    let mut doc = Document::new();
    let root = doc.root();
    let mut cursor = 0;

    for paragraph in paragraphs {
        let Some(span) = paragraph.span() else {
            continue;
        };
        push_gap(&mut doc, root, &chars, cursor..span.start)?;
        let container = doc.append(
            root,
            NodeKind::Paragraph {
                index: paragraph.index,
            },
        )?;
        cursor = span.start;

        for sentence in &paragraph.sentences {
            push_gap(&mut doc, container, &chars, cursor..sentence.span.start)?;
            let anchor = doc.append(
                container,
                NodeKind::Sentence {
                    index: sentence.index,
                },
            )?;
            push_marked(&mut doc, anchor, &chars, sentence.span.clone(), inlines)?;
            cursor = cursor.max(sentence.span.end);
        }
    }
    push_gap(&mut doc, root, &chars, cursor..chars.len())?;

    Ok(doc)
}

/// Append `range` under `parent`, wrapping the parts covered by `inlines`
///
/// Inline spans are clipped to `range`; a span crossing a sentence boundary
/// is split into one element per sentence.
fn push_marked(
    doc: &mut Document,
    parent: NodeId,
    chars: &[char],
    range: Range<usize>,
    inlines: &[InlineSpan],
) -> Result<()> {
    let mut cursor = range.start;
    let mut i = 0;

    while i < inlines.len() {
        let start = inlines[i].span.start.max(cursor);
        let end = inlines[i].span.end.min(range.end);
        if start >= end {
            i += 1;
            continue;
        }

        push_gap(doc, parent, chars, cursor..start)?;
        let element = doc.append(
            parent,
            NodeKind::Inline {
                tag: inlines[i].tag.to_string(),
            },
        )?;
        let nested = inlines[i + 1..]
            .iter()
            .take_while(|inner| inner.span.start < end)
            .count();
        push_marked(doc, element, chars, start..end, &inlines[i + 1..i + 1 + nested])?;

        cursor = end;
        i += 1 + nested;
    }
    push_gap(doc, parent, chars, cursor..range.end)
}

fn push_gap(doc: &mut Document, parent: NodeId, chars: &[char], range: Range<usize>) -> Result<()> {
    let end = range.end.min(chars.len());
    if range.start < end {
        let gap: String = chars[range.start..end].iter().collect();
        doc.append(parent, NodeKind::Text(gap))?;
    }
    Ok(())
}
