//! Selection events published when an overlay or indicator is activated

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::Annotation;

/// What the reader selected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selection {
    /// A single overlay: the full annotation record
    Annotation { annotation: Annotation },

    /// A sentence indicator: the aggregated annotations of that sentence
    Sentence {
        index: usize,
        text: String,
        annotations: Vec<Annotation>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionEvent {
    pub selection: Selection,
    pub timestamp: DateTime<Utc>,
}

impl SelectionEvent {
    pub fn new(selection: Selection) -> Self {
        Self {
            selection,
            timestamp: Utc::now(),
        }
    }
}

/// Fan-out of selection events to side panels and other listeners
#[derive(Debug, Clone)]
pub struct SelectionBroadcaster {
    tx: broadcast::Sender<SelectionEvent>,
}

impl SelectionBroadcaster {
    /// Create new broadcaster with channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast to all subscribers, returning how many received it
    ///
    /// Having no subscribers is not an error.
    pub fn broadcast(&self, event: SelectionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SelectionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SelectionBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
