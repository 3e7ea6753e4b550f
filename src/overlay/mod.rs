//! Overlay renderer
//!
//! Splices annotation overlays into the rendered document and keeps track of
//! which overlay nodes belong to which layer, so every layer can be removed
//! on its own and leave the original text layout behind.
//!
//! Layers are applied in kind priority order (replay, concept, argument,
//! lens). A leaf already wrapped by any overlay is never matched again, so
//! an earlier layer wins when two layers target the same text.

pub mod aggregate;
pub mod events;

pub use aggregate::{group_by_sentence, SentenceSparks};
pub use events::{Selection, SelectionBroadcaster, SelectionEvent};

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::document::{Document, NodeId, NodeKind, OverlayMark};
use crate::error::{MarginaliaError, Result};
use crate::index::PositionIndex;
use crate::matcher::{locate, Location, MatchOutcome, Miss};
use crate::types::{
    Annotation, AnnotationId, AnnotationKind, ArgumentSpark, ConceptSpark, InsightHistoryItem,
    LayerKey, LensResult,
};
use crate::utils::string::split_at_chars;

/// A named set of annotations of one kind
#[derive(Debug, Clone)]
pub struct AnnotationLayer {
    pub key: LayerKey,
    pub annotations: Vec<Annotation>,
}

impl AnnotationLayer {
    pub fn new(key: LayerKey, annotations: Vec<Annotation>) -> Self {
        Self { key, annotations }
    }

    pub fn concepts(sparks: &[ConceptSpark]) -> Self {
        Self::new(
            LayerKey::of(AnnotationKind::Concept),
            sparks.iter().map(Annotation::from).collect(),
        )
    }

    pub fn arguments(sparks: &[ArgumentSpark]) -> Self {
        Self::new(
            LayerKey::of(AnnotationKind::Argument),
            sparks.iter().map(Annotation::from).collect(),
        )
    }

    pub fn lens(result: &LensResult) -> Self {
        Self::new(
            LayerKey::lens(result.lens_type),
            result
                .highlights
                .iter()
                .map(|h| h.to_annotation(result.lens_type))
                .collect(),
        )
    }

    pub fn replay(history: &[InsightHistoryItem]) -> Self {
        Self::new(
            LayerKey::of(AnnotationKind::Replay),
            history.iter().map(Annotation::from).collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

/// Why an annotation was not rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound(Miss),
    Splice(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub id: AnnotationId,
    pub preview: String,
    pub reason: SkipReason,
}

/// Result of applying one layer
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Annotation and the overlay node created for it
    pub applied: Vec<(AnnotationId, NodeId)>,
    pub skipped: Vec<Skipped>,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Owns the bookkeeping for every active overlay layer
#[derive(Debug, Default)]
pub struct OverlayRenderer {
    layers: BTreeMap<LayerKey, Vec<NodeId>>,
    indicators: Vec<NodeId>,
    broadcaster: SelectionBroadcaster,
    stagger: Duration,
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between successive annotations in [`apply_paced`](Self::apply_paced)
    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn is_active(&self, key: &LayerKey) -> bool {
        self.layers.contains_key(key)
    }

    pub fn active_layers(&self) -> impl Iterator<Item = &LayerKey> {
        self.layers.keys()
    }

    pub fn has_indicators(&self) -> bool {
        !self.indicators.is_empty()
    }

    /// Overlay nodes currently owned by a layer
    pub fn layer_nodes(&self, key: &LayerKey) -> &[NodeId] {
        self.layers.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SelectionEvent> {
        self.broadcaster.subscribe()
    }

    /// Forget all bookkeeping without touching a document
    ///
    /// Used when the document itself is replaced by a fresh render.
    pub fn reset(&mut self) {
        self.layers.clear();
        self.indicators.clear();
    }

    /// Apply one layer, replacing it first if it is already active
    pub fn apply(&mut self, doc: &mut Document, layer: &AnnotationLayer) -> Result<ApplyReport> {
        self.remove_layer(doc, &layer.key)?;

        let mut report = ApplyReport::default();
        for annotation in &layer.annotations {
            self.apply_one(doc, &layer.key, annotation, &mut report);
        }
        self.finish(layer, &report);
        Ok(report)
    }

    /// Same as [`apply`](Self::apply), pausing between annotations
    pub async fn apply_paced(
        &mut self,
        doc: &mut Document,
        layer: &AnnotationLayer,
    ) -> Result<ApplyReport> {
        self.remove_layer(doc, &layer.key)?;

        let mut report = ApplyReport::default();
        for (i, annotation) in layer.annotations.iter().enumerate() {
            if i > 0 && !self.stagger.is_zero() {
                tokio::time::sleep(self.stagger).await;
            }
            self.apply_one(doc, &layer.key, annotation, &mut report);
        }
        self.finish(layer, &report);
        Ok(report)
    }

    /// Apply several layers in kind priority order
    pub fn apply_layers(
        &mut self,
        doc: &mut Document,
        layers: &[AnnotationLayer],
    ) -> Result<Vec<(LayerKey, ApplyReport)>> {
        let mut ordered: Vec<&AnnotationLayer> = layers.iter().collect();
        ordered.sort_by(|a, b| a.key.cmp(&b.key));

        let mut reports = Vec::with_capacity(ordered.len());
        for layer in ordered {
            let report = self.apply(doc, layer)?;
            reports.push((layer.key.clone(), report));
        }
        Ok(reports)
    }

    /// Remove the layer if active, otherwise apply it
    ///
    /// Returns the apply report when the layer was switched on.
    pub fn toggle(
        &mut self,
        doc: &mut Document,
        layer: &AnnotationLayer,
    ) -> Result<Option<ApplyReport>> {
        if self.is_active(&layer.key) {
            self.remove_layer(doc, &layer.key)?;
            Ok(None)
        } else {
            self.apply(doc, layer).map(Some)
        }
    }

    fn apply_one(
        &mut self,
        doc: &mut Document,
        key: &LayerKey,
        annotation: &Annotation,
        report: &mut ApplyReport,
    ) {
        let index = PositionIndex::build(doc);
        let location = match locate(doc, &index, &annotation.target) {
            MatchOutcome::Found(location) => location,
            MatchOutcome::NotFound(miss) => {
                warn!(
                    layer = %key,
                    text = %annotation.preview(),
                    reason = %miss,
                    "Annotation not found, skipping"
                );
                report.skipped.push(Skipped {
                    id: annotation.id,
                    preview: annotation.preview(),
                    reason: SkipReason::NotFound(miss),
                });
                return;
            }
        };

        let mark = OverlayMark {
            layer: key.clone(),
            annotation: annotation.clone(),
        };
        match splice(doc, &location, mark) {
            Ok(node) => {
                debug!(
                    layer = %key,
                    strategy = %location.strategy,
                    text = %annotation.preview(),
                    "Overlay applied"
                );
                self.layers.entry(key.clone()).or_default().push(node);
                report.applied.push((annotation.id, node));
            }
            Err(e) => {
                warn!(layer = %key, error = %e, "Overlay splice failed, skipping");
                report.skipped.push(Skipped {
                    id: annotation.id,
                    preview: annotation.preview(),
                    reason: SkipReason::Splice(e.to_string()),
                });
            }
        }
    }

    fn finish(&mut self, layer: &AnnotationLayer, report: &ApplyReport) {
        // An applied-but-empty layer still counts as switched on
        self.layers.entry(layer.key.clone()).or_default();
        info!(
            layer = %layer.key,
            applied = report.applied_count(),
            skipped = report.skipped_count(),
            "Layer applied"
        );
    }

    /// Remove one layer, restoring its original text
    ///
    /// Returns how many overlays were removed; removing an inactive layer is
    /// a no-op.
    pub fn remove_layer(&mut self, doc: &mut Document, key: &LayerKey) -> Result<usize> {
        let Some(nodes) = self.layers.remove(key) else {
            return Ok(0);
        };

        let mut parents = BTreeSet::new();
        let mut removed = 0;
        for node in nodes {
            if doc.get(node).is_none() {
                continue;
            }
            parents.insert(doc.unwrap_node(node)?);
            removed += 1;
        }
        for parent in parents {
            if doc.get(parent).is_some() {
                doc.normalize(parent)?;
            }
        }

        debug!(layer = %key, removed, "Layer removed");
        Ok(removed)
    }

    /// Remove every layer of a kind
    pub fn remove(&mut self, doc: &mut Document, kind: AnnotationKind) -> Result<usize> {
        let keys: Vec<LayerKey> = self
            .layers
            .keys()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect();

        let mut removed = 0;
        for key in keys {
            removed += self.remove_layer(doc, &key)?;
        }
        Ok(removed)
    }

    /// Remove every layer and every indicator
    pub fn remove_all(&mut self, doc: &mut Document) -> Result<usize> {
        let keys: Vec<LayerKey> = self.layers.keys().cloned().collect();
        let mut removed = 0;
        for key in keys {
            removed += self.remove_layer(doc, &key)?;
        }
        removed += self.remove_indicators(doc)?;
        Ok(removed)
    }

    /// Attach one indicator per sentence that owns sparks
    ///
    /// Sentences without an anchor are skipped. Existing indicators are
    /// replaced.
    pub fn apply_indicators(
        &mut self,
        doc: &mut Document,
        concepts: &[ConceptSpark],
        arguments: &[ArgumentSpark],
    ) -> Result<usize> {
        self.remove_indicators(doc)?;

        for (sentence_index, sparks) in group_by_sentence(concepts, arguments) {
            let Some(anchor) = doc.anchor(sentence_index) else {
                warn!(sentence_index, "No anchor for sparks, skipping indicator");
                continue;
            };
            let node = doc.append(anchor, NodeKind::Indicator(sparks.to_mark(sentence_index)))?;
            self.indicators.push(node);
        }

        info!(indicators = self.indicators.len(), "Sentence indicators applied");
        Ok(self.indicators.len())
    }

    pub fn remove_indicators(&mut self, doc: &mut Document) -> Result<usize> {
        let mut removed = 0;
        for node in std::mem::take(&mut self.indicators) {
            if doc.get(node).is_some() {
                doc.remove(node)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Activate an overlay or indicator (or any node inside an overlay)
    ///
    /// Broadcasts and returns the selection.
    pub fn activate(&self, doc: &Document, node: NodeId) -> Result<SelectionEvent> {
        let kind = doc.kind(node).ok_or(MarginaliaError::NodeNotFound(node))?;

        let selection = match kind {
            NodeKind::Overlay(mark) => Selection::Annotation {
                annotation: mark.annotation.clone(),
            },
            NodeKind::Indicator(mark) => {
                let text = doc
                    .anchor(mark.sentence_index)
                    .map(|anchor| doc.text_content(anchor))
                    .unwrap_or_default();
                Selection::Sentence {
                    index: mark.sentence_index,
                    text,
                    annotations: mark.annotations.clone(),
                }
            }
            _ => match doc.enclosing_overlay(node) {
                Some((_, mark)) => Selection::Annotation {
                    annotation: mark.annotation.clone(),
                },
                None => {
                    return Err(MarginaliaError::InvalidOperation(format!(
                        "node {} is not an annotation",
                        node
                    )))
                }
            },
        };

        let event = SelectionEvent::new(selection);
        let receivers = self.broadcaster.broadcast(event.clone());
        debug!(node = %node, receivers, "Selection broadcast");
        Ok(event)
    }
}

/// Replace a leaf by before-text, overlay(match), after-text
fn splice(doc: &mut Document, location: &Location, mark: OverlayMark) -> Result<NodeId> {
    let text = doc
        .text(location.leaf)
        .ok_or_else(|| {
            MarginaliaError::InvalidOperation(format!("node {} is not a text leaf", location.leaf))
        })?
        .to_string();
    let (before, matched, after) = split_at_chars(&text, location.local.clone());

    if !before.is_empty() {
        doc.insert_before(location.leaf, NodeKind::Text(before.to_string()))?;
    }
    let overlay = doc.insert_before(location.leaf, NodeKind::Overlay(mark))?;
    doc.append(overlay, NodeKind::Text(matched.to_string()))?;
    if !after.is_empty() {
        doc.insert_before(location.leaf, NodeKind::Text(after.to_string()))?;
    }
    doc.remove(location.leaf)?;

    Ok(overlay)
}
