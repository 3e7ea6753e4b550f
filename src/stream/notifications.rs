//! Analysis notification channel
//!
//! Long-lived SSE subscription that tells the reader when background
//! analysis of an article progresses or completes.
//!
//! # Reconnection
//!
//! Reconnection is explicit and bounded:
//! - Delay starts at `initial_delay_ms` and doubles up to `max_delay_ms`
//! - After `max_attempts` consecutive failures the subscriber gives up
//! - Any received event resets the failure count
//!
//! Interest in one article is expressed with an [`AnalysisWatch`], which
//! filters the shared notification feed and is released when dropped.

use eventsource_client as es;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{ReaderConfig, ReconnectPolicy};
use crate::error::{MarginaliaError, Result};

/// Event delivered on the notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Connected {
        user_id: Option<i64>,
    },
    AnalysisProgress {
        article_id: i64,
        stage: String,
        progress: f64,
    },
    AnalysisComplete {
        article_id: i64,
    },
    /// `task_started`, `task_completed`, `task_failed`
    Task {
        event: String,
        data: serde_json::Value,
    },
    Heartbeat,
}

impl Notification {
    pub fn article_id(&self) -> Option<i64> {
        match self {
            Self::AnalysisProgress { article_id, .. } | Self::AnalysisComplete { article_id } => {
                Some(*article_id)
            }
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ConnectedPayload {
    #[serde(default)]
    user_id: Option<i64>,
}

#[derive(Deserialize)]
struct ProgressPayload {
    article_id: i64,
    #[serde(default)]
    stage: String,
    #[serde(default)]
    progress: f64,
}

#[derive(Deserialize)]
struct CompletePayload {
    article_id: i64,
}

/// Parse one SSE event of the notification channel
///
/// Unknown event types yield `Ok(None)`.
pub fn parse_notification(event_type: &str, data: &str) -> Result<Option<Notification>> {
    let notification = match event_type {
        "connected" => {
            let payload: ConnectedPayload = serde_json::from_str(data)?;
            Notification::Connected {
                user_id: payload.user_id,
            }
        }
        "analysis_progress" => {
            let payload: ProgressPayload = serde_json::from_str(data)?;
            Notification::AnalysisProgress {
                article_id: payload.article_id,
                stage: payload.stage,
                progress: payload.progress,
            }
        }
        "analysis_complete" => {
            let payload: CompletePayload = serde_json::from_str(data)?;
            Notification::AnalysisComplete {
                article_id: payload.article_id,
            }
        }
        "heartbeat" => Notification::Heartbeat,
        other if other.starts_with("task_") => Notification::Task {
            event: other.to_string(),
            data: serde_json::from_str(data).unwrap_or(serde_json::Value::Null),
        },
        _ => return Ok(None),
    };
    Ok(Some(notification))
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

/// Subscriber for the analysis notification channel
pub struct NotificationSubscriber {
    url: String,
    policy: ReconnectPolicy,
    tx: broadcast::Sender<Notification>,
}

impl NotificationSubscriber {
    pub fn new(config: &ReaderConfig, user_id: i64) -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            url: format!(
                "{}/{}?user_id={}",
                config.api.base_url.trim_end_matches('/'),
                config.notifications.path.trim_start_matches('/'),
                user_id
            ),
            policy: config.notifications.reconnect.clone(),
            tx,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Watch one article's progress and completion
    pub fn watch(&self, article_id: i64) -> AnalysisWatch {
        AnalysisWatch {
            article_id,
            rx: self.tx.subscribe(),
        }
    }

    /// Publish a parsed notification to every subscriber
    pub fn publish(&self, notification: Notification) -> usize {
        self.tx.send(notification).unwrap_or(0)
    }

    /// Consume the channel until shutdown or until reconnects are exhausted
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("Notification subscriber starting: {}", self.url);
        let mut failures: u32 = 0;

        loop {
            let outcome = match es::ClientBuilder::for_url(&self.url) {
                Ok(builder) => {
                    let client = builder
                        .reconnect(es::ReconnectOptions::reconnect(false).build())
                        .build();
                    self.stream_events(&client, &mut failures, &mut shutdown_rx)
                        .await
                }
                Err(e) => Err(format!("failed to build client: {}", e)),
            };

            match outcome {
                Ok(StreamEnd::Shutdown) => break,
                Ok(StreamEnd::Closed) => {
                    info!("Notification stream closed by server, reconnecting");
                }
                Err(e) => {
                    failures += 1;
                    warn!(failures, "Notification stream error: {}", e);
                }
            }

            if self.policy.exhausted(failures) {
                error!(failures, "Notification reconnect attempts exhausted");
                return Err(MarginaliaError::Notification(format!(
                    "gave up after {} consecutive failures",
                    failures
                )));
            }

            let delay = self.policy.delay_for(failures.max(1));
            debug!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Notification subscriber stopped");
        Ok(())
    }

    async fn stream_events(
        &self,
        client: &impl es::Client,
        failures: &mut u32,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> std::result::Result<StreamEnd, String> {
        use tokio_stream::StreamExt;

        let mut stream = client.stream();

        loop {
            let next = tokio::select! {
                _ = shutdown_rx.recv() => return Ok(StreamEnd::Shutdown),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(es::SSE::Connected(_))) => {
                    debug!("Notification channel connected");
                    *failures = 0;
                }
                Some(Ok(es::SSE::Event(event))) => {
                    *failures = 0;
                    match parse_notification(&event.event_type, &event.data) {
                        Ok(Some(notification)) => {
                            debug!(event_type = %event.event_type, "Notification received");
                            self.publish(notification);
                        }
                        Ok(None) => {
                            debug!(event_type = %event.event_type, "Ignoring unknown notification");
                        }
                        Err(e) => {
                            warn!(event_type = %event.event_type, error = %e, "Malformed notification");
                        }
                    }
                }
                Some(Ok(es::SSE::Comment(_))) => {}
                Some(Err(e)) => return Err(format!("SSE stream error: {}", e)),
                None => return Ok(StreamEnd::Closed),
            }
        }
    }
}

enum StreamEnd {
    Shutdown,
    Closed,
}

/// Per-article view of the notification feed
///
/// Created by [`NotificationSubscriber::watch`]; dropping it releases the
/// subscription.
pub struct AnalysisWatch {
    article_id: i64,
    rx: broadcast::Receiver<Notification>,
}

impl AnalysisWatch {
    pub fn article_id(&self) -> i64 {
        self.article_id
    }

    /// Next progress or completion event for this article
    ///
    /// `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(notification) if notification.article_id() == Some(self.article_id) => {
                    return Some(notification)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Analysis watch lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Wait until analysis of this article completes
    pub async fn completed(&mut self) -> bool {
        while let Some(notification) = self.next().await {
            if matches!(notification, Notification::AnalysisComplete { .. }) {
                return true;
            }
        }
        false
    }
}
