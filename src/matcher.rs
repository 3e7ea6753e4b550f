//! Annotation matcher
//!
//! Resolves an annotation [`Target`] to one live leaf location. Strategies
//! are tried in order and the first success wins:
//!
//! 1. **Offset**: the span must land inside exactly one unwrapped leaf and,
//!    when the target carries literal text, the text at that position must
//!    equal it. Anything else (multi-leaf span, empty span, mismatch) falls
//!    through; a wrong highlight is never produced.
//! 2. **Anchor-scoped search**: with a sentence index whose anchor exists,
//!    the first occurrence of the literal text under that anchor.
//! 3. **Text search**: the first unwrapped leaf in document order containing
//!    the literal text, first occurrence only.
//!
//! Leaves wrapped by any overlay are never candidates, so annotations never
//! nest inside each other.

use std::fmt;
use std::ops::Range;
use tracing::debug;

use crate::document::{Document, NodeId};
use crate::index::PositionIndex;
use crate::types::Target;
use crate::utils::string::{char_len, char_slice, find_chars};

/// Which strategy produced a location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Offset,
    AnchorScoped,
    TextSearch,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Offset => "offset",
            Self::AnchorScoped => "anchor",
            Self::TextSearch => "text_search",
        };
        f.write_str(name)
    }
}

/// A matched sub-range of one text leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub leaf: NodeId,
    /// Char range local to the leaf
    pub local: Range<usize>,
    pub strategy: Strategy,
}

/// Why the offset strategy gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetRejection {
    EmptySpan,
    OutOfRange,
    MultiLeaf(usize),
    Wrapped,
    TextMismatch { found: String },
}

impl fmt::Display for OffsetRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySpan => f.write_str("empty span"),
            Self::OutOfRange => f.write_str("span outside document"),
            Self::MultiLeaf(n) => write!(f, "span crosses {} leaves", n),
            Self::Wrapped => f.write_str("span inside an existing overlay"),
            Self::TextMismatch { found } => write!(f, "text at offset is {:?}", found),
        }
    }
}

/// Details of a failed match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Miss {
    pub offset: Option<OffsetRejection>,
    /// Literal text was available and searched for
    pub searched: bool,
}

impl fmt::Display for Miss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.offset, self.searched) {
            (Some(rejection), true) => write!(f, "{}; text not found", rejection),
            (Some(rejection), false) => write!(f, "{}; no text to search", rejection),
            (None, true) => f.write_str("text not found"),
            (None, false) => f.write_str("no locator"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Found(Location),
    NotFound(Miss),
}

impl MatchOutcome {
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Found(location) => Some(location),
            Self::NotFound(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Locate a target in the current document
///
/// `index` must be built from `doc` after its last mutation.
pub fn locate(doc: &Document, index: &PositionIndex, target: &Target) -> MatchOutcome {
    let mut miss = Miss::default();

    if let Some(span) = &target.span {
        match by_offset(doc, index, span.clone(), target.text.as_deref()) {
            Ok(location) => return MatchOutcome::Found(location),
            Err(rejection) => {
                debug!(span = ?span, reason = %rejection, "Offset match rejected, falling back");
                miss.offset = Some(rejection);
            }
        }
    }

    let Some(needle) = target.search_text() else {
        return MatchOutcome::NotFound(miss);
    };
    miss.searched = true;

    if let Some(anchor) = target.sentence_index.and_then(|i| doc.anchor(i)) {
        if let Some(location) = search(doc, index, doc.text_leaves(anchor), needle) {
            return MatchOutcome::Found(Location {
                strategy: Strategy::AnchorScoped,
                ..location
            });
        }
    }

    let leaves = index.entries().iter().map(|e| e.leaf);
    match search(doc, index, leaves, needle) {
        Some(location) => MatchOutcome::Found(location),
        None => MatchOutcome::NotFound(miss),
    }
}

fn by_offset(
    doc: &Document,
    index: &PositionIndex,
    span: Range<usize>,
    expected: Option<&str>,
) -> Result<Location, OffsetRejection> {
    if span.start >= span.end {
        return Err(OffsetRejection::EmptySpan);
    }
    if span.end > index.total_len() {
        return Err(OffsetRejection::OutOfRange);
    }

    let mut locations = index.to_leaf_locations(span.clone());
    if locations.len() != 1 {
        return Err(OffsetRejection::MultiLeaf(locations.len()));
    }
    let location = locations.remove(0);
    if location.wrapped.is_some() {
        return Err(OffsetRejection::Wrapped);
    }

    if let Some(expected) = expected {
        let leaf_text = doc.text(location.leaf).unwrap_or("");
        let found = char_slice(leaf_text, location.local.clone());
        if found != expected {
            return Err(OffsetRejection::TextMismatch {
                found: found.to_string(),
            });
        }
    }

    Ok(Location {
        leaf: location.leaf,
        local: location.local,
        strategy: Strategy::Offset,
    })
}

fn search<I>(doc: &Document, index: &PositionIndex, leaves: I, needle: &str) -> Option<Location>
where
    I: IntoIterator<Item = NodeId>,
{
    let needle_len = char_len(needle);
    leaves
        .into_iter()
        .filter(|leaf| index.entry(*leaf).is_some_and(|e| !e.is_wrapped()))
        .find_map(|leaf| {
            let start = find_chars(doc.text(leaf)?, needle)?;
            Some(Location {
                leaf,
                local: start..start + needle_len,
                strategy: Strategy::TextSearch,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{render_article, NodeKind};

    fn matched_text(doc: &Document, location: &Location) -> String {
        char_slice(doc.text(location.leaf).unwrap(), location.local.clone()).to_string()
    }

    #[test]
    fn test_offset_match_verifies_text() {
        let rendered = render_article("Markets rose sharply. Analysts were surprised.").unwrap();
        let index = PositionIndex::build(&rendered.document);

        let outcome = locate(&rendered.document, &index, &Target::span(22..30, "Analysts"));
        let location = outcome.location().unwrap();
        assert_eq!(location.strategy, Strategy::Offset);
        assert_eq!(matched_text(&rendered.document, location), "Analysts");
    }

    #[test]
    fn test_stale_offset_falls_back_to_text_search() {
        let rendered = render_article("Markets rose sharply. Analysts were surprised.").unwrap();
        let index = PositionIndex::build(&rendered.document);

        let outcome = locate(&rendered.document, &index, &Target::span(3..11, "Analysts"));
        let location = outcome.location().unwrap();
        assert_eq!(location.strategy, Strategy::TextSearch);
        assert_eq!(matched_text(&rendered.document, location), "Analysts");
    }

    #[test]
    fn test_multi_leaf_span_is_not_split() {
        let mut doc = Document::new();
        let root = doc.root();
        doc.append(root, NodeKind::Text("plain ".into())).unwrap();
        let em = doc.append(root, NodeKind::Inline { tag: "em".into() }).unwrap();
        doc.append(em, NodeKind::Text("emphasis".into())).unwrap();
        let index = PositionIndex::build(&doc);

        let outcome = locate(&doc, &index, &Target::span(2..10, "ain empha"));
        assert_eq!(
            outcome,
            MatchOutcome::NotFound(Miss {
                offset: Some(OffsetRejection::MultiLeaf(2)),
                searched: true,
            })
        );
    }

    #[test]
    fn test_anchor_scope_preferred_over_first_occurrence() {
        let rendered = render_article("The cost rose. Later the cost fell.").unwrap();
        let index = PositionIndex::build(&rendered.document);

        let target = Target::text("cost").with_sentence(1);
        let location = locate(&rendered.document, &index, &target)
            .location()
            .cloned()
            .unwrap();
        assert_eq!(location.strategy, Strategy::AnchorScoped);
        assert_eq!(rendered.document.enclosing_sentence(location.leaf), Some(1));
    }

    #[test]
    fn test_missing_anchor_uses_global_search() {
        let rendered = render_article("The cost rose. Later the cost fell.").unwrap();
        let index = PositionIndex::build(&rendered.document);

        let target = Target::text("cost").with_sentence(40);
        let location = locate(&rendered.document, &index, &target)
            .location()
            .cloned()
            .unwrap();
        assert_eq!(location.strategy, Strategy::TextSearch);
        assert_eq!(rendered.document.enclosing_sentence(location.leaf), Some(0));
    }

    #[test]
    fn test_absent_text_not_found() {
        let rendered = render_article("Nothing to see.").unwrap();
        let index = PositionIndex::build(&rendered.document);
        let outcome = locate(&rendered.document, &index, &Target::text("elephant"));
        assert!(!outcome.is_found());
    }

    #[test]
    fn test_blank_target_has_no_locator() {
        let rendered = render_article("Nothing to see.").unwrap();
        let index = PositionIndex::build(&rendered.document);
        let outcome = locate(&rendered.document, &index, &Target::text("   "));
        assert_eq!(outcome, MatchOutcome::NotFound(Miss::default()));
    }
}
