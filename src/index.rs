//! Position index over the rendered document
//!
//! Maps flat-text char offsets to text leaves and back. Entries cover every
//! non-empty text leaf in document order with contiguous half-open ranges,
//! so offsets keep their meaning after overlays are spliced in. Leaves that
//! sit inside an overlay are recorded with the overlay's kind and are
//! refused by the offset lookups: nothing can be matched inside an existing
//! annotation.
//!
//! An index is a snapshot. Rebuild it after every document mutation.

use std::collections::HashMap;
use std::ops::Range;

use crate::document::{Document, NodeId};
use crate::types::AnnotationKind;

/// One text leaf and its range in the flat text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub leaf: NodeId,
    pub start: usize,
    pub end: usize,
    /// Kind of the overlay wrapping this leaf
    pub wrapped: Option<AnnotationKind>,
}

impl IndexEntry {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapped.is_some()
    }
}

/// A sub-range of one leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafLocation {
    pub leaf: NodeId,
    /// Char range local to the leaf text
    pub local: Range<usize>,
    pub wrapped: Option<AnnotationKind>,
}

#[derive(Debug, Clone, Default)]
pub struct PositionIndex {
    entries: Vec<IndexEntry>,
    by_leaf: HashMap<NodeId, usize>,
    total: usize,
}

impl PositionIndex {
    /// Scan the document's text leaves in order
    pub fn build(doc: &Document) -> Self {
        let mut entries = Vec::new();
        let mut by_leaf = HashMap::new();
        let mut offset = 0;

        for leaf in doc.text_leaves(doc.root()) {
            let len = doc.text(leaf).map_or(0, |t| t.chars().count());
            if len == 0 {
                continue;
            }
            let wrapped = doc.enclosing_overlay(leaf).map(|(_, mark)| mark.kind());
            by_leaf.insert(leaf, entries.len());
            entries.push(IndexEntry {
                leaf,
                start: offset,
                end: offset + len,
                wrapped,
            });
            offset += len;
        }

        Self {
            entries,
            by_leaf,
            total: offset,
        }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of the flat text in chars
    pub fn total_len(&self) -> usize {
        self.total
    }

    pub fn entry(&self, leaf: NodeId) -> Option<&IndexEntry> {
        self.by_leaf.get(&leaf).map(|i| &self.entries[*i])
    }

    /// Flat-text range of a local range inside `leaf`
    ///
    /// `None` when the leaf is unknown, wrapped by an overlay, or the local
    /// range falls outside it.
    pub fn to_offset_range(&self, leaf: NodeId, local: Range<usize>) -> Option<Range<usize>> {
        let entry = self.entry(leaf)?;
        if entry.is_wrapped() || local.start > local.end || local.end > entry.len() {
            return None;
        }
        Some(entry.start + local.start..entry.start + local.end)
    }

    /// Leaves intersecting a flat-text range, with local sub-ranges
    ///
    /// A range crossing leaf boundaries yields several locations; callers
    /// decide whether to accept that. Empty ranges yield nothing.
    pub fn to_leaf_locations(&self, range: Range<usize>) -> Vec<LeafLocation> {
        if range.start >= range.end {
            return Vec::new();
        }

        let first = self.entries.partition_point(|e| e.end <= range.start);
        self.entries[first..]
            .iter()
            .take_while(|e| e.start < range.end)
            .map(|e| {
                let start = range.start.max(e.start) - e.start;
                let end = range.end.min(e.end) - e.start;
                LeafLocation {
                    leaf: e.leaf,
                    local: start..end,
                    wrapped: e.wrapped,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{render_article, NodeKind};

    #[test]
    fn test_entries_are_contiguous() {
        let rendered = render_article("One two. Three four!\n\nFive.").unwrap();
        let index = PositionIndex::build(&rendered.document);

        let mut expected_start = 0;
        for entry in index.entries() {
            assert_eq!(entry.start, expected_start);
            assert!(!entry.is_empty());
            expected_start = entry.end;
        }
        assert_eq!(index.total_len(), rendered.text.chars().count());
    }

    #[test]
    fn test_lookup_inside_one_leaf() {
        let rendered = render_article("One two. Three four!").unwrap();
        let index = PositionIndex::build(&rendered.document);

        let locations = index.to_leaf_locations(9..14);
        assert_eq!(locations.len(), 1);
        let loc = &locations[0];
        assert_eq!(loc.local, 0..5);
        assert_eq!(rendered.document.text(loc.leaf), Some("Three four!"));
        assert_eq!(index.to_offset_range(loc.leaf, loc.local.clone()), Some(9..14));
    }

    #[test]
    fn test_lookup_across_leaves() {
        let rendered = render_article("One two. Three four!").unwrap();
        let index = PositionIndex::build(&rendered.document);
        // "two. Three" spans sentence, gap and sentence leaves
        assert_eq!(index.to_leaf_locations(4..14).len(), 3);
    }

    #[test]
    fn test_empty_and_out_of_range() {
        let rendered = render_article("Short.").unwrap();
        let index = PositionIndex::build(&rendered.document);
        assert!(index.to_leaf_locations(3..3).is_empty());
        assert!(index.to_leaf_locations(50..60).is_empty());
    }

    #[test]
    fn test_multibyte_offsets_are_chars() {
        let rendered = render_article("火花很亮。 Sparks!").unwrap();
        let index = PositionIndex::build(&rendered.document);
        let locations = index.to_leaf_locations(6..12);
        assert_eq!(locations.len(), 1);
        assert_eq!(rendered.document.text(locations[0].leaf), Some("Sparks!"));
    }

    #[test]
    fn test_to_offset_range_rejects_bad_local_range() {
        let mut doc = Document::new();
        let leaf = doc.append(doc.root(), NodeKind::Text("abc".into())).unwrap();
        let index = PositionIndex::build(&doc);
        assert_eq!(index.to_offset_range(leaf, 1..3), Some(1..3));
        assert_eq!(index.to_offset_range(leaf, 2..5), None);
    }
}
