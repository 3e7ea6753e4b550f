//! Marginalia - reading-assistant core
//!
//! Turns raw article text into an addressable document and lays machine
//! generated annotations over it:
//! - Sentence and paragraph segmentation with stable indices
//! - Character-offset index over the rendered text
//! - Multi-strategy matching of annotation targets (offset, sentence, text)
//! - Prioritized, removable overlay layers and per-sentence indicators
//! - Streamed insight generation over an event-line protocol
//!
//! # Architecture
//!
//! - **Segment**: text to [`Paragraph`]s of [`Sentence`]s
//! - **Document**: arena tree with sentence anchors, plus rendering
//! - **Index / Matcher**: offsets to text leaves, targets to locations
//! - **Overlay**: layers, indicators and selection events
//! - **Stream**: line codec, dispatcher, HTTP client, notifications
//! - **Session**: one open article with its active layers
//!
//! # Example
//!
//! ```ignore
//! use marginalia_core::{ReaderConfig, ReadingSession};
//!
//! let mut session = ReadingSession::new(ReaderConfig::default());
//! session.load_article("Prices climbed again. Most economists blame energy costs.")?;
//! let outcome = session.apply_report(&report)?;
//! println!("{}", session.document().to_markup());
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod matcher;
pub mod overlay;
pub mod segment;
pub mod services;
pub mod session;
pub mod stream;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::ReaderConfig;
pub use document::{Document, NodeId, NodeKind, Rendered};
pub use error::{MarginaliaError, Result};
pub use index::PositionIndex;
pub use matcher::{locate, MatchOutcome, Strategy};
pub use overlay::{AnnotationLayer, ApplyReport, OverlayRenderer, Selection, SelectionEvent};
pub use segment::{segment, sentences};
pub use services::{ApiClient, FollowUpConversation, InsightGeneration, InsightRequest};
pub use session::{ReadingSession, ReportOutcome};
pub use stream::{StreamClient, StreamEvent, StreamHandler, StreamState};
pub use types::{
    AnalysisReport, Annotation, AnnotationKind, InsightHistoryItem, LayerKey, LensResult,
    LensType, Paragraph, Sentence, Target,
};
