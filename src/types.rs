//! Core data types for the Marginalia reading core
//!
//! Sentences and paragraphs are produced by the segmenter; annotations are
//! built from backend payload records (concept/argument sparks, lens
//! highlights, insight history) and carried unchanged through matching and
//! overlay rendering.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use uuid::Uuid;

/// One sentence of the article
///
/// `index` is global across the whole article and contiguous from 0.
/// `span` is the char range of the trimmed text inside the normalized
/// article text (for backend-provided sentence lists it is the range inside
/// the re-rendered text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub index: usize,
    pub text: String,
    pub paragraph_index: usize,
    pub span: Range<usize>,
}

/// A paragraph and the sentences it owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub index: usize,
    pub sentences: Vec<Sentence>,
}

impl Paragraph {
    /// Char range covered by this paragraph's sentences
    pub fn span(&self) -> Option<Range<usize>> {
        let first = self.sentences.first()?;
        let last = self.sentences.last()?;
        Some(first.span.start..last.span.end)
    }
}

/// Unique identifier for a rendered annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(pub Uuid);

impl AnnotationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Annotation layer class
///
/// Variants are declared in application priority order, so the derived `Ord`
/// sorts the most specific (user-anchored) kind first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Historical insight replay (user's own earlier selections)
    Replay,
    /// Concept spark
    Concept,
    /// Argument spark
    Argument,
    /// Thinking-lens highlight
    Lens,
}

impl AnnotationKind {
    /// Fixed application order: replay > concept > argument > lens
    pub const PRIORITY: [AnnotationKind; 4] = [
        AnnotationKind::Replay,
        AnnotationKind::Concept,
        AnnotationKind::Argument,
        AnnotationKind::Lens,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replay => "replay",
            Self::Concept => "concept",
            Self::Argument => "argument",
            Self::Lens => "lens",
        }
    }
}

impl std::fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one independently toggleable overlay layer
///
/// Most kinds have exactly one layer named after the kind; lens layers are
/// keyed per lens type so several can be active at once.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerKey {
    pub kind: AnnotationKind,
    pub name: String,
}

impl LayerKey {
    pub fn of(kind: AnnotationKind) -> Self {
        Self {
            kind,
            name: kind.as_str().to_string(),
        }
    }

    pub fn lens(lens_type: LensType) -> Self {
        Self {
            kind: AnnotationKind::Lens,
            name: lens_type.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for LayerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name == self.kind.as_str() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}/{}", self.kind, self.name)
        }
    }
}

/// Where an annotation wants to land
///
/// Any combination may be present. Offsets win when they verify, the
/// sentence index scopes the literal search, and the literal text is the
/// final fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Char offsets into the original flat article text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Range<usize>>,

    /// Literal text fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Global sentence index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence_index: Option<usize>,
}

impl Target {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn span(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            span: Some(range),
            text: Some(text.into()),
            sentence_index: None,
        }
    }

    pub fn with_sentence(mut self, index: usize) -> Self {
        self.sentence_index = Some(index);
        self
    }

    /// Literal text trimmed for searching; `None` when missing or blank
    pub fn search_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Visual marker hints, passed through to the overlay node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Kind-specific payload, displayed or relayed but never interpreted by the
/// overlay renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationDetail {
    Concept {
        importance_score: f32,
        explanation_hint: String,
    },
    Argument {
        role: ArgumentRole,
        role_description: String,
    },
    Lens {
        lens_type: LensType,
        tooltip: String,
    },
    Replay {
        insight_id: i64,
        intent: String,
        question: Option<String>,
        insight: String,
        reasoning: Option<String>,
        context_before: Option<String>,
        context_after: Option<String>,
        created_at: Option<String>,
    },
}

/// A backend-produced record describing a span to mark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
    pub target: Target,
    /// Category / type label (e.g. "claim", "subjective", "explain")
    pub label: String,
    pub marker: Marker,
    pub detail: AnnotationDetail,
}

impl Annotation {
    /// Tooltip / explanation text shown on the overlay node
    pub fn tooltip(&self) -> String {
        match &self.detail {
            AnnotationDetail::Concept {
                explanation_hint, ..
            } => explanation_hint.clone(),
            AnnotationDetail::Argument {
                role_description, ..
            } => role_description.clone(),
            AnnotationDetail::Lens { tooltip, .. } => tooltip.clone(),
            AnnotationDetail::Replay { insight, .. } => insight.clone(),
        }
    }

    /// Short form of the target text for logs
    pub fn preview(&self) -> String {
        crate::utils::truncate_at_char_boundary(self.target.text.as_deref().unwrap_or(""), 30)
    }
}

// ---------------------------------------------------------------------------
// Backend payload records
// ---------------------------------------------------------------------------

/// Concept spark: a term worth explaining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptSpark {
    pub text: String,
    pub sentence_index: usize,
    #[serde(default)]
    pub importance_score: f32,
    #[serde(default)]
    pub explanation_hint: String,
}

/// Role of an argument spark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentRole {
    Claim,
    Evidence,
    Transition,
}

impl ArgumentRole {
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Claim => "📝",
            Self::Evidence => "📊",
            Self::Transition => "🔄",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Evidence => "evidence",
            Self::Transition => "transition",
        }
    }
}

/// Argument spark: claim / evidence / transition marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentSpark {
    #[serde(rename = "type")]
    pub role: ArgumentRole,
    pub text: String,
    pub sentence_index: usize,
    #[serde(default)]
    pub role_description: String,
}

/// Thinking lens flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensType {
    ArgumentStructure,
    AuthorStance,
}

impl LensType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArgumentStructure => "argument_structure",
            Self::AuthorStance => "author_stance",
        }
    }
}

impl std::fmt::Display for LensType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lens highlight, addressed by offsets into the original text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensHighlight {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub category: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub tooltip: String,
}

/// Lens-level commentary, displayed by the side panel only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LensAnnotations {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub statistics: serde_json::Map<String, serde_json::Value>,
}

/// Thinking lens analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensResult {
    #[serde(default)]
    pub id: i64,
    pub lens_type: LensType,
    pub highlights: Vec<LensHighlight>,
    #[serde(default)]
    pub annotations: LensAnnotations,
}

/// A previously generated insight, replayed over the article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightHistoryItem {
    pub id: i64,
    pub selected_text: String,
    #[serde(default)]
    pub selected_start: Option<usize>,
    #[serde(default)]
    pub selected_end: Option<usize>,
    #[serde(default)]
    pub context_before: Option<String>,
    #[serde(default)]
    pub context_after: Option<String>,
    pub intent: String,
    #[serde(default)]
    pub question: Option<String>,
    pub insight: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Article analysis report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub meta_info: serde_json::Value,
    #[serde(default)]
    pub concept_sparks: Vec<ConceptSpark>,
    #[serde(default)]
    pub argument_sparks: Vec<ArgumentSpark>,
    #[serde(default)]
    pub knowledge_graph_nodes: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Backend sentence split; replaces the local segmentation when present
    #[serde(default)]
    pub sentences: Option<Vec<String>>,
}

impl AnalysisReport {
    pub fn spark_count(&self) -> usize {
        self.concept_sparks.len() + self.argument_sparks.len()
    }
}

const CONCEPT_COLOR: &str = "#10b981";
const ARGUMENT_COLOR: &str = "#3b82f6";
const REPLAY_COLOR: &str = "#f97316";

impl From<&ConceptSpark> for Annotation {
    fn from(spark: &ConceptSpark) -> Self {
        Self {
            id: AnnotationId::new(),
            kind: AnnotationKind::Concept,
            target: Target::text(spark.text.clone()).with_sentence(spark.sentence_index),
            label: "concept".to_string(),
            marker: Marker {
                color: Some(CONCEPT_COLOR.to_string()),
                icon: Some("💡".to_string()),
            },
            detail: AnnotationDetail::Concept {
                importance_score: spark.importance_score,
                explanation_hint: spark.explanation_hint.clone(),
            },
        }
    }
}

impl From<&ArgumentSpark> for Annotation {
    fn from(spark: &ArgumentSpark) -> Self {
        Self {
            id: AnnotationId::new(),
            kind: AnnotationKind::Argument,
            target: Target::text(spark.text.clone()).with_sentence(spark.sentence_index),
            label: spark.role.as_str().to_string(),
            marker: Marker {
                color: Some(ARGUMENT_COLOR.to_string()),
                icon: Some(spark.role.icon().to_string()),
            },
            detail: AnnotationDetail::Argument {
                role: spark.role,
                role_description: spark.role_description.clone(),
            },
        }
    }
}

impl LensHighlight {
    pub fn to_annotation(&self, lens_type: LensType) -> Annotation {
        Annotation {
            id: AnnotationId::new(),
            kind: AnnotationKind::Lens,
            target: Target::span(self.start..self.end, self.text.clone()),
            label: self.category.clone(),
            marker: Marker {
                color: Some(self.color.clone()).filter(|c| !c.is_empty()),
                icon: None,
            },
            detail: AnnotationDetail::Lens {
                lens_type,
                tooltip: self.tooltip.clone(),
            },
        }
    }
}

impl From<&InsightHistoryItem> for Annotation {
    fn from(item: &InsightHistoryItem) -> Self {
        let span = match (item.selected_start, item.selected_end) {
            (Some(start), Some(end)) => Some(start..end),
            _ => None,
        };
        Self {
            id: AnnotationId::new(),
            kind: AnnotationKind::Replay,
            target: Target {
                span,
                text: Some(item.selected_text.clone()),
                sentence_index: None,
            },
            label: item.intent.clone(),
            marker: Marker {
                color: Some(REPLAY_COLOR.to_string()),
                icon: None,
            },
            detail: AnnotationDetail::Replay {
                insight_id: item.id,
                intent: item.intent.clone(),
                question: item.question.clone(),
                insight: item.insight.clone(),
                reasoning: item.reasoning.clone(),
                context_before: item.context_before.clone(),
                context_after: item.context_after.clone(),
                created_at: item.created_at.clone(),
            },
        }
    }
}
