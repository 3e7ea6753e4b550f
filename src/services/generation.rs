//! Stream consumers for insight generation and follow-up questions

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info, warn};

use crate::stream::{Completion, StreamFailure, StreamHandler};
use crate::utils::string::char_slice;

/// Chars of article context saved on each side of a selection
pub const CONTEXT_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Explain,
    Analyze,
    Counter,
    Custom,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explain => "explain",
            Self::Analyze => "analyze",
            Self::Counter => "counter",
            Self::Custom => "custom",
        }
    }
}

/// Body of an insight generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRequest {
    pub selected_text: String,
    pub context: String,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_question: Option<String>,
    #[serde(default)]
    pub use_reasoning: bool,
    #[serde(default)]
    pub include_full_text: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a follow-up conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning: None,
            timestamp: Some(Utc::now().timestamp_millis()),
        }
    }
}

/// Body of a follow-up request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRequest {
    pub selected_text: String,
    pub initial_insight: String,
    pub conversation_history: Vec<Message>,
    pub follow_up_question: String,
    #[serde(default)]
    pub use_reasoning: bool,
}

/// Record persisted to the insight history endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveInsightRequest {
    pub article_id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub selected_text: String,
    #[serde(default)]
    pub selected_start: Option<usize>,
    #[serde(default)]
    pub selected_end: Option<usize>,
    #[serde(default)]
    pub context_before: Option<String>,
    #[serde(default)]
    pub context_after: Option<String>,
    pub intent: Intent,
    #[serde(default)]
    pub question: Option<String>,
    pub insight: String,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Up to [`CONTEXT_CHARS`] chars of article text on each side of `selection`
pub fn context_window(article: &str, selection: Range<usize>) -> (String, String) {
    let before_start = selection.start.saturating_sub(CONTEXT_CHARS);
    let before = char_slice(article, before_start..selection.start).to_string();
    let after = char_slice(article, selection.end..selection.end + CONTEXT_CHARS).to_string();
    (before, after)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationStatus {
    #[default]
    Idle,
    Generating,
    Done,
    Failed,
}

/// Accumulates one streamed insight
#[derive(Debug, Clone, Default)]
pub struct InsightGeneration {
    pub status: GenerationStatus,
    pub content: String,
    pub reasoning: String,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl InsightGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_generating(&self) -> bool {
        self.status == GenerationStatus::Generating
    }

    /// Build the history record for a finished insight
    ///
    /// `None` unless the generation completed with content.
    pub fn to_history_record(
        &self,
        request: &InsightRequest,
        article_id: i64,
        user_id: Option<i64>,
        article: &str,
        selection: Option<Range<usize>>,
    ) -> Option<SaveInsightRequest> {
        if self.status != GenerationStatus::Done || self.content.is_empty() {
            return None;
        }
        let (context_before, context_after) = selection
            .clone()
            .map(|range| context_window(article, range))
            .unzip();
        Some(SaveInsightRequest {
            article_id,
            user_id,
            selected_text: request.selected_text.clone(),
            selected_start: selection.as_ref().map(|r| r.start),
            selected_end: selection.as_ref().map(|r| r.end),
            context_before,
            context_after,
            intent: request.intent,
            question: request.custom_question.clone(),
            insight: self.content.clone(),
            reasoning: Some(self.reasoning.clone()).filter(|r| !r.is_empty()),
        })
    }
}

impl StreamHandler for InsightGeneration {
    fn on_start(&mut self, _request_id: Option<&str>) {
        self.status = GenerationStatus::Generating;
        self.content.clear();
        self.reasoning.clear();
        self.error = None;
        debug!("Insight generation started");
    }

    fn on_delta(&mut self, content: &str) {
        self.status = GenerationStatus::Generating;
        self.content.push_str(content);
    }

    fn on_reasoning(&mut self, content: &str) {
        self.status = GenerationStatus::Generating;
        self.reasoning.push_str(content);
    }

    fn on_complete(&mut self, completion: &Completion) {
        if self.content.is_empty() {
            if let Some(full) = &completion.full_content {
                self.content = full.clone();
            }
        }
        if self.reasoning.is_empty() {
            if let Some(full) = &completion.full_reasoning {
                self.reasoning = full.clone();
            }
        }
        self.metadata = completion.metadata.clone();
        self.status = GenerationStatus::Done;
        info!(
            content_chars = self.content.chars().count(),
            reasoning_chars = self.reasoning.chars().count(),
            "Insight generation complete"
        );
    }

    fn on_error(&mut self, failure: &StreamFailure) {
        self.status = GenerationStatus::Failed;
        self.error = Some(failure.message().to_string());
        warn!(error = %failure, "Insight generation failed");
    }
}

/// Follow-up conversation about one insight
#[derive(Debug, Clone)]
pub struct FollowUpConversation {
    selected_text: String,
    initial_insight: String,
    history: Vec<Message>,
    answer: InsightGeneration,
}

impl FollowUpConversation {
    pub fn new(selected_text: impl Into<String>, initial_insight: impl Into<String>) -> Self {
        Self {
            selected_text: selected_text.into(),
            initial_insight: initial_insight.into(),
            history: Vec::new(),
            answer: InsightGeneration::new(),
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn answer(&self) -> &InsightGeneration {
        &self.answer
    }

    /// Record the question and build the request for it
    ///
    /// The request carries the history *before* this question.
    pub fn ask(&mut self, question: impl Into<String>, use_reasoning: bool) -> FollowUpRequest {
        let question = question.into();
        let request = FollowUpRequest {
            selected_text: self.selected_text.clone(),
            initial_insight: self.initial_insight.clone(),
            conversation_history: self.history.clone(),
            follow_up_question: question.clone(),
            use_reasoning,
        };
        self.history.push(Message::new(Role::User, question));
        self.answer = InsightGeneration::new();
        request
    }
}

impl StreamHandler for FollowUpConversation {
    fn on_start(&mut self, request_id: Option<&str>) {
        self.answer.on_start(request_id);
    }

    fn on_delta(&mut self, content: &str) {
        self.answer.on_delta(content);
    }

    fn on_reasoning(&mut self, content: &str) {
        self.answer.on_reasoning(content);
    }

    fn on_complete(&mut self, completion: &Completion) {
        self.answer.on_complete(completion);
        let mut message = Message::new(Role::Assistant, self.answer.content.clone());
        message.reasoning = Some(self.answer.reasoning.clone()).filter(|r| !r.is_empty());
        self.history.push(message);
    }

    fn on_error(&mut self, failure: &StreamFailure) {
        self.answer.on_error(failure);
        // The unanswered question leaves the history again
        if self.history.last().is_some_and(|m| m.role == Role::User) {
            self.history.pop();
        }
    }
}
