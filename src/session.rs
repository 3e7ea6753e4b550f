//! Reading session
//!
//! Explicit context object for one open article: the rendered document,
//! the overlay renderer and the layers the reader switched on. Every entry
//! point takes the session, so no feature keeps its own global state.
//!
//! Layers are kept in kind priority order regardless of the order they
//! arrive in: installing a layer first lifts every lower-priority layer off
//! the document and puts it back afterwards.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::ReaderConfig;
use crate::document::{render_article, render_backend_sentences, Document, NodeId, Rendered};
use crate::error::Result;
use crate::overlay::{AnnotationLayer, ApplyReport, OverlayRenderer, SelectionEvent};
use crate::services::ApiClient;
use crate::stream::AnalysisWatch;
use crate::types::{
    AnalysisReport, AnnotationKind, InsightHistoryItem, LayerKey, LensResult, Paragraph,
};

/// What `apply_report` did
#[derive(Debug, Default)]
pub struct ReportOutcome {
    /// The backend sentence list replaced local segmentation
    pub rerendered: bool,
    pub layers: Vec<(LayerKey, ApplyReport)>,
    pub indicators: usize,
}

pub struct ReadingSession {
    config: ReaderConfig,
    rendered: Rendered,
    renderer: OverlayRenderer,
    layers: BTreeMap<LayerKey, AnnotationLayer>,
    report: Option<AnalysisReport>,
}

impl ReadingSession {
    pub fn new(config: ReaderConfig) -> Self {
        let renderer =
            OverlayRenderer::new().with_stagger(Duration::from_millis(config.overlay.stagger_ms));
        Self {
            config,
            rendered: Rendered {
                document: Document::new(),
                paragraphs: Vec::new(),
                text: String::new(),
            },
            renderer,
            layers: BTreeMap::new(),
            report: None,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.rendered.document
    }

    /// Flat text the current render was built from
    pub fn text(&self) -> &str {
        &self.rendered.text
    }

    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.rendered.paragraphs
    }

    pub fn sentence_count(&self) -> usize {
        self.rendered.sentence_count()
    }

    pub fn renderer(&self) -> &OverlayRenderer {
        &self.renderer
    }

    pub fn report(&self) -> Option<&AnalysisReport> {
        self.report.as_ref()
    }

    pub fn is_layer_active(&self, key: &LayerKey) -> bool {
        self.layers.contains_key(key)
    }

    /// Render a new article; all overlays are dropped
    pub fn load_article(&mut self, text: &str) -> Result<usize> {
        self.rendered = render_article(text)?;
        self.renderer.reset();
        self.layers.clear();
        self.report = None;
        info!(
            sentences = self.sentence_count(),
            paragraphs = self.rendered.paragraphs.len(),
            "Article loaded"
        );
        Ok(self.sentence_count())
    }

    /// Replace local segmentation with a backend sentence list
    ///
    /// Active layers are re-applied on the new render.
    pub fn adopt_backend_sentences(
        &mut self,
        sentences: &[String],
    ) -> Result<Vec<(LayerKey, ApplyReport)>> {
        self.rendered = render_backend_sentences(
            sentences,
            self.config.overlay.backend_sentences_per_paragraph,
        )?;
        self.renderer.reset();

        let layers: Vec<AnnotationLayer> = self.layers.values().cloned().collect();
        let reports = self
            .renderer
            .apply_layers(&mut self.rendered.document, &layers)?;
        debug!(layers = reports.len(), "Re-applied layers after re-render");
        Ok(reports)
    }

    /// Place an analysis report's sparks
    ///
    /// A report carrying its own sentence split re-renders first. Sparks
    /// become overlay layers, or per-sentence indicators when
    /// `overlay.aggregate_sparks` is set.
    pub fn apply_report(&mut self, report: &AnalysisReport) -> Result<ReportOutcome> {
        let mut outcome = ReportOutcome::default();

        if let Some(sentences) = report.sentences.as_ref().filter(|s| !s.is_empty()) {
            self.adopt_backend_sentences(sentences)?;
            outcome.rerendered = true;
        }

        self.remove_kind(AnnotationKind::Concept)?;
        self.remove_kind(AnnotationKind::Argument)?;

        if self.config.overlay.aggregate_sparks {
            outcome.indicators = self.renderer.apply_indicators(
                &mut self.rendered.document,
                &report.concept_sparks,
                &report.argument_sparks,
            )?;
        } else {
            for layer in [
                AnnotationLayer::concepts(&report.concept_sparks),
                AnnotationLayer::arguments(&report.argument_sparks),
            ] {
                let key = layer.key.clone();
                let applied = self.install(layer)?;
                outcome.layers.push((key, applied));
            }
        }

        info!(
            sparks = report.spark_count(),
            rerendered = outcome.rerendered,
            "Analysis report applied"
        );
        self.report = Some(report.clone());
        Ok(outcome)
    }

    /// Fetch an article's analysis report and place its sparks
    pub async fn fetch_report(
        &mut self,
        api: &ApiClient,
        article_id: i64,
    ) -> Result<ReportOutcome> {
        let report = api.analysis_report(article_id).await?;
        self.apply_report(&report)
    }

    /// Wait for the watched article's analysis, then fetch and apply its report
    ///
    /// Returns `None` when the notification feed closes first.
    pub async fn apply_when_analyzed(
        &mut self,
        watch: &mut AnalysisWatch,
        api: &ApiClient,
    ) -> Result<Option<ReportOutcome>> {
        if !watch.completed().await {
            debug!(
                article_id = watch.article_id(),
                "Notification feed closed before analysis completed"
            );
            return Ok(None);
        }
        info!(article_id = watch.article_id(), "Analysis complete, fetching report");
        self.fetch_report(api, watch.article_id()).await.map(Some)
    }

    /// Switch a thinking lens on or off
    pub fn toggle_lens(&mut self, result: &LensResult) -> Result<Option<ApplyReport>> {
        let layer = AnnotationLayer::lens(result);
        if self.layers.contains_key(&layer.key) {
            self.layers.remove(&layer.key);
            self.renderer
                .remove_layer(&mut self.rendered.document, &layer.key)?;
            Ok(None)
        } else {
            self.install(layer).map(Some)
        }
    }

    /// Replay earlier insights over the article
    pub fn show_replay(&mut self, history: &[InsightHistoryItem]) -> Result<ApplyReport> {
        self.install(AnnotationLayer::replay(history))
    }

    /// Remove every overlay and indicator
    pub fn clear_overlays(&mut self) -> Result<usize> {
        self.layers.clear();
        self.renderer.remove_all(&mut self.rendered.document)
    }

    pub fn remove_kind(&mut self, kind: AnnotationKind) -> Result<usize> {
        self.layers.retain(|key, _| key.kind != kind);
        self.renderer.remove(&mut self.rendered.document, kind)
    }

    /// Activate an overlay or indicator node
    pub fn activate(&self, node: NodeId) -> Result<SelectionEvent> {
        self.renderer.activate(&self.rendered.document, node)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SelectionEvent> {
        self.renderer.subscribe()
    }

    /// Apply a layer while keeping priority order
    fn install(&mut self, layer: AnnotationLayer) -> Result<ApplyReport> {
        let doc = &mut self.rendered.document;

        let displaced: Vec<LayerKey> = self
            .layers
            .keys()
            .filter(|key| **key > layer.key)
            .cloned()
            .collect();
        for key in &displaced {
            self.renderer.remove_layer(doc, key)?;
        }

        let report = self.renderer.apply(doc, &layer)?;
        self.layers.insert(layer.key.clone(), layer);

        for key in &displaced {
            if let Some(lower) = self.layers.get(key) {
                self.renderer.apply(doc, lower)?;
            }
        }
        Ok(report)
    }
}
