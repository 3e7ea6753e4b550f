//! Services layer: REST collaborator and generation stream consumers

pub mod api;
pub mod generation;

pub use api::{ApiClient, InsightHistory};
pub use generation::{
    context_window, FollowUpConversation, FollowUpRequest, GenerationStatus, InsightGeneration,
    InsightRequest, Intent, Message, Role, SaveInsightRequest,
};
