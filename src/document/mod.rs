//! Rendered document model
//!
//! An arena tree standing in for the live rendered article. Nodes are
//! addressed by [`NodeId`]; removed slots are left empty so ids held by
//! callers never alias a different node.
//!
//! Text lives only in [`NodeKind::Text`] leaves. Concatenating every text
//! leaf in document order yields the rendered flat text; overlays wrap text
//! leaves and indicators carry no text, so neither changes that
//! concatenation.

pub mod markdown;
pub mod render;

pub use markdown::is_markdown;
pub use render::{render_article, render_backend_sentences, render_paragraphs, Rendered};

use std::collections::HashMap;
use std::fmt;

use crate::error::{MarginaliaError, Result};
use crate::types::{Annotation, AnnotationKind, LayerKey};

/// Handle to a node in a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Styled annotation wrapper data
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayMark {
    pub layer: LayerKey,
    pub annotation: Annotation,
}

impl OverlayMark {
    pub fn kind(&self) -> AnnotationKind {
        self.layer.kind
    }
}

/// Compact per-sentence indicator for aggregated annotations
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorMark {
    pub sentence_index: usize,
    pub icon: String,
    pub tooltip: String,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Paragraph { index: usize },
    /// Sentence container; doubles as the sentence anchor
    Sentence { index: usize },
    /// Inline markup element (emphasis, links, ...)
    Inline { tag: String },
    Text(String),
    Overlay(OverlayMark),
    Indicator(IndicatorMark),
}

impl NodeKind {
    pub fn is_container(&self) -> bool {
        !matches!(self, NodeKind::Text(_) | NodeKind::Indicator(_))
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Mutable rendered document
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Option<Node>>,
    root: NodeId,
    anchors: HashMap<usize, NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            })],
            root: NodeId(0),
            anchors: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.get(id).ok_or(MarginaliaError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(MarginaliaError::NodeNotFound(id))
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.get(id).map(|n| &n.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Text of a text leaf
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Number of live nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.children(self.root).is_empty()
    }

    fn alloc(&mut self, kind: NodeKind, parent: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len());
        if let NodeKind::Sentence { index } = &kind {
            self.anchors.insert(*index, id);
        }
        self.nodes.push(Some(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        }));
        id
    }

    /// Append a new last child to `parent`
    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId> {
        if !self.node(parent)?.kind.is_container() {
            return Err(MarginaliaError::InvalidOperation(format!(
                "cannot append under leaf {}",
                parent
            )));
        }
        let id = self.alloc(kind, parent);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Insert a new node immediately before `sibling`
    pub fn insert_before(&mut self, sibling: NodeId, kind: NodeKind) -> Result<NodeId> {
        let parent = self.node(sibling)?.parent.ok_or_else(|| {
            MarginaliaError::InvalidOperation("cannot insert beside the root".to_string())
        })?;
        let position = self.position_in_parent(parent, sibling)?;
        let id = self.alloc(kind, parent);
        self.node_mut(parent)?.children.insert(position, id);
        Ok(id)
    }

    fn position_in_parent(&self, parent: NodeId, child: NodeId) -> Result<usize> {
        self.node(parent)?
            .children
            .iter()
            .position(|c| *c == child)
            .ok_or(MarginaliaError::NodeNotFound(child))
    }

    /// Detach `id` and free it together with its subtree
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let parent = self.node(id)?.parent.ok_or_else(|| {
            MarginaliaError::InvalidOperation("cannot remove the root".to_string())
        })?;
        let position = self.position_in_parent(parent, id)?;
        self.node_mut(parent)?.children.remove(position);
        self.free_subtree(id);
        Ok(())
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current.0).and_then(Option::take) {
                if let NodeKind::Sentence { index } = node.kind {
                    self.anchors.remove(&index);
                }
                stack.extend(node.children);
            }
        }
    }

    /// Replace a node by its children, keeping their order and position
    ///
    /// Returns the former parent.
    pub fn unwrap_node(&mut self, id: NodeId) -> Result<NodeId> {
        let parent = self.node(id)?.parent.ok_or_else(|| {
            MarginaliaError::InvalidOperation("cannot unwrap the root".to_string())
        })?;
        let position = self.position_in_parent(parent, id)?;
        let children = std::mem::take(&mut self.node_mut(id)?.children);
        for child in &children {
            self.node_mut(*child)?.parent = Some(parent);
        }
        let siblings = &mut self.node_mut(parent)?.children;
        siblings.splice(position..=position, children).for_each(drop);
        self.free_subtree(id);
        Ok(parent)
    }

    /// Merge adjacent text children and drop empty ones, recursively
    pub fn normalize(&mut self, id: NodeId) -> Result<()> {
        let children = self.node(id)?.children.clone();
        let mut kept: Vec<NodeId> = Vec::with_capacity(children.len());
        let mut dropped: Vec<NodeId> = Vec::new();

        for child in children {
            let text = self.text(child).map(str::to_owned);
            match text {
                Some(text) if text.is_empty() => dropped.push(child),
                Some(text) => {
                    let previous = kept.last().copied().filter(|p| self.text(*p).is_some());
                    match previous {
                        Some(previous) => {
                            if let NodeKind::Text(existing) = &mut self.node_mut(previous)?.kind {
                                existing.push_str(&text);
                            }
                            dropped.push(child);
                        }
                        None => kept.push(child),
                    }
                }
                None => {
                    self.normalize(child)?;
                    kept.push(child);
                }
            }
        }

        self.node_mut(id)?.children = kept;
        for child in dropped {
            self.free_subtree(child);
        }
        Ok(())
    }

    /// Text leaves under `id` in document order
    pub fn text_leaves(&self, id: NodeId) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.get(current) else {
                continue;
            };
            if matches!(node.kind, NodeKind::Text(_)) {
                leaves.push(current);
            }
            stack.extend(node.children.iter().rev());
        }
        leaves
    }

    /// Concatenated text of every leaf under `id`
    pub fn text_content(&self, id: NodeId) -> String {
        self.text_leaves(id)
            .into_iter()
            .filter_map(|leaf| self.text(leaf))
            .collect()
    }

    /// Full rendered flat text
    pub fn plain_text(&self) -> String {
        self.text_content(self.root)
    }

    /// Nearest overlay ancestor of `id`, if any
    pub fn enclosing_overlay(&self, id: NodeId) -> Option<(NodeId, &OverlayMark)> {
        let mut current = self.parent(id);
        while let Some(node_id) = current {
            let node = self.get(node_id)?;
            if let NodeKind::Overlay(mark) = &node.kind {
                return Some((node_id, mark));
            }
            current = node.parent;
        }
        None
    }

    /// Nearest sentence anchor enclosing `id`
    pub fn enclosing_sentence(&self, id: NodeId) -> Option<usize> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get(node_id)?;
            if let NodeKind::Sentence { index } = node.kind {
                return Some(index);
            }
            current = node.parent;
        }
        None
    }

    /// Sentence anchor by global index
    pub fn anchor(&self, sentence_index: usize) -> Option<NodeId> {
        self.anchors.get(&sentence_index).copied()
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// All live nodes matching `predicate`, in document order
    pub fn find_all<F>(&self, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&NodeKind) -> bool,
    {
        let mut found = Vec::new();
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            let Some(node) = self.get(current) else {
                continue;
            };
            if predicate(&node.kind) {
                found.push(current);
            }
            stack.extend(node.children.iter().rev());
        }
        found
    }

    /// Lightweight markup rendering for terminal output
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        self.write_markup(self.root, &mut out);
        out
    }

    fn write_markup(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else {
            return;
        };
        let (open, close) = match &node.kind {
            NodeKind::Root => (String::new(), String::new()),
            NodeKind::Paragraph { index } => (format!("<p data-index=\"{}\">", index), "</p>".into()),
            NodeKind::Sentence { index } => (
                format!("<span data-sentence=\"{}\">", index),
                "</span>".into(),
            ),
            NodeKind::Inline { tag } => (format!("<{}>", tag), format!("</{}>", tag)),
            NodeKind::Text(text) => {
                out.push_str(text);
                return;
            }
            NodeKind::Overlay(mark) => (
                format!(
                    "<mark data-layer=\"{}\" data-label=\"{}\">",
                    mark.layer, mark.annotation.label
                ),
                "</mark>".into(),
            ),
            NodeKind::Indicator(mark) => {
                out.push_str(&format!("[{}]", mark.icon));
                return;
            }
        };

        out.push_str(&open);
        for child in &node.children {
            self.write_markup(*child, out);
        }
        out.push_str(&close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> NodeKind {
        NodeKind::Text(s.to_string())
    }

    #[test]
    fn test_append_and_text_content() {
        let mut doc = Document::new();
        let p = doc.append(doc.root(), NodeKind::Paragraph { index: 0 }).unwrap();
        doc.append(p, text("Hello ")).unwrap();
        let em = doc
            .append(p, NodeKind::Inline { tag: "em".to_string() })
            .unwrap();
        doc.append(em, text("world")).unwrap();

        assert_eq!(doc.plain_text(), "Hello world");
        assert_eq!(doc.text_leaves(doc.root()).len(), 2);
    }

    #[test]
    fn test_cannot_append_under_text() {
        let mut doc = Document::new();
        let leaf = doc.append(doc.root(), text("x")).unwrap();
        assert!(matches!(
            doc.append(leaf, text("y")),
            Err(MarginaliaError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_anchor_registered_and_dropped() {
        let mut doc = Document::new();
        let s = doc.append(doc.root(), NodeKind::Sentence { index: 4 }).unwrap();
        assert_eq!(doc.anchor(4), Some(s));

        doc.remove(s).unwrap();
        assert_eq!(doc.anchor(4), None);
        assert!(doc.get(s).is_none());
    }

    #[test]
    fn test_unwrap_and_normalize_merge_text() {
        let mut doc = Document::new();
        let root = doc.root();
        doc.append(root, text("ab")).unwrap();
        let wrapper = doc
            .append(root, NodeKind::Inline { tag: "b".to_string() })
            .unwrap();
        doc.append(wrapper, text("cd")).unwrap();
        doc.append(root, text("")).unwrap();
        doc.append(root, text("ef")).unwrap();

        let parent = doc.unwrap_node(wrapper).unwrap();
        doc.normalize(parent).unwrap();

        assert_eq!(doc.children(root).len(), 1);
        assert_eq!(doc.plain_text(), "abcdef");
    }

    #[test]
    fn test_insert_before_keeps_order() {
        let mut doc = Document::new();
        let b = doc.append(doc.root(), text("b")).unwrap();
        doc.insert_before(b, text("a")).unwrap();
        assert_eq!(doc.plain_text(), "ab");
    }

    #[test]
    fn test_removed_node_errors() {
        let mut doc = Document::new();
        let leaf = doc.append(doc.root(), text("x")).unwrap();
        doc.remove(leaf).unwrap();
        assert!(matches!(
            doc.remove(leaf),
            Err(MarginaliaError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_markup() {
        let mut doc = Document::new();
        let s = doc.append(doc.root(), NodeKind::Sentence { index: 0 }).unwrap();
        doc.append(s, text("Hi.")).unwrap();
        assert_eq!(doc.to_markup(), "<span data-sentence=\"0\">Hi.</span>");
    }
}
