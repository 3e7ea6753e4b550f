//! Common test utilities and helpers

#![allow(dead_code)]

use marginalia_core::types::{
    Annotation, AnnotationDetail, AnnotationId, AnnotationKind, LensType, Marker, Target,
};

pub const ARTICLE: &str = "Inflation eased in March. Central banks paused rate hikes. \
Most analysts expect cuts later.\n\nMarkets rallied on the news. Bond yields fell sharply.";

/// Lens-style annotation addressed by offsets and text
pub fn lens_annotation(start: usize, end: usize, text: &str) -> Annotation {
    Annotation {
        id: AnnotationId::new(),
        kind: AnnotationKind::Lens,
        target: Target::span(start..end, text),
        label: "subjective".to_string(),
        marker: Marker::default(),
        detail: AnnotationDetail::Lens {
            lens_type: LensType::AuthorStance,
            tooltip: "stance marker".to_string(),
        },
    }
}

/// Concept-style annotation addressed by sentence and text
pub fn concept_annotation(sentence_index: usize, text: &str) -> Annotation {
    Annotation {
        id: AnnotationId::new(),
        kind: AnnotationKind::Concept,
        target: Target::text(text).with_sentence(sentence_index),
        label: "concept".to_string(),
        marker: Marker::default(),
        detail: AnnotationDetail::Concept {
            importance_score: 7.0,
            explanation_hint: "worth a look".to_string(),
        },
    }
}

/// Char offset of `needle` in `haystack`
pub fn char_offset(haystack: &str, needle: &str) -> usize {
    let byte = haystack.find(needle).expect("needle present in fixture");
    haystack[..byte].chars().count()
}
