//! Per-sentence aggregation of concept and argument sparks
//!
//! Instead of wrapping sub-spans, every sentence that owns sparks gets one
//! compact indicator carrying the whole set.

use std::collections::BTreeMap;

use crate::document::IndicatorMark;
use crate::types::{Annotation, ArgumentSpark, ConceptSpark};

pub const CONCEPT_ICON: &str = "💡";
pub const ARGUMENT_ICON: &str = "📝";
pub const COMBINED_ICON: &str = "✨";

/// Sparks that share one sentence
#[derive(Debug, Clone, Default)]
pub struct SentenceSparks<'a> {
    pub concepts: Vec<&'a ConceptSpark>,
    pub arguments: Vec<&'a ArgumentSpark>,
}

impl SentenceSparks<'_> {
    pub fn icon(&self) -> &'static str {
        match (self.concepts.is_empty(), self.arguments.is_empty()) {
            (false, true) => CONCEPT_ICON,
            (true, false) => ARGUMENT_ICON,
            _ => COMBINED_ICON,
        }
    }

    pub fn tooltip(&self) -> String {
        let concept_lines = self.concepts.iter().map(|c| {
            format!(
                "{} {} ({}/10) - {}",
                CONCEPT_ICON, c.text, c.importance_score, c.explanation_hint
            )
        });
        let argument_lines = self
            .arguments
            .iter()
            .map(|a| format!("{} {}", a.role.icon(), a.role_description));
        concept_lines
            .chain(argument_lines)
            .collect::<Vec<_>>()
            .join(" | ")
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.concepts
            .iter()
            .map(|c| Annotation::from(*c))
            .chain(self.arguments.iter().map(|a| Annotation::from(*a)))
            .collect()
    }

    pub fn to_mark(&self, sentence_index: usize) -> IndicatorMark {
        IndicatorMark {
            sentence_index,
            icon: self.icon().to_string(),
            tooltip: self.tooltip(),
            annotations: self.annotations(),
        }
    }
}

/// Group sparks by sentence index, in sentence order
pub fn group_by_sentence<'a>(
    concepts: &'a [ConceptSpark],
    arguments: &'a [ArgumentSpark],
) -> BTreeMap<usize, SentenceSparks<'a>> {
    let mut groups: BTreeMap<usize, SentenceSparks<'a>> = BTreeMap::new();
    for concept in concepts {
        groups
            .entry(concept.sentence_index)
            .or_default()
            .concepts
            .push(concept);
    }
    for argument in arguments {
        groups
            .entry(argument.sentence_index)
            .or_default()
            .arguments
            .push(argument);
    }
    groups
}
