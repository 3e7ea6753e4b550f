//! Streaming event client
//!
//! A generation request is one POST whose chunked body carries marked JSON
//! lines. The body is decoded with [`EventLineCodec`] and each event is
//! dispatched to a [`StreamHandler`] in arrival order.
//!
//! ```text
//! Idle → Connecting → Streaming → Completed | Failed
//!                         └──────→ Cancelled (shutdown signal)
//! ```
//!
//! Exactly one terminal callback (`on_complete` or `on_error`) is invoked
//! per request, and nothing is dispatched after it. Transport failures and
//! bodies that end early are reported through `on_error`; `on_complete` is
//! only ever driven by a `complete` event.

pub mod client;
pub mod codec;
pub mod notifications;

pub use client::{StreamClient, StreamHandle};
pub use codec::{EventLineCodec, Frame, DEFAULT_MARKER};
pub use notifications::{AnalysisWatch, Notification, NotificationSubscriber};

use bytes::Buf;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

/// Payload of the terminal `complete` event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub full_content: Option<String>,
    #[serde(default)]
    pub full_reasoning: Option<String>,
}

/// Payload of the terminal `error` event, also synthesized for transport
/// failures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFailure {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

impl StreamFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            code: None,
        }
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("unknown error")
    }
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message(), code),
            None => f.write_str(self.message()),
        }
    }
}

/// One event of the generation protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start {
        #[serde(default)]
        request_id: Option<String>,
    },
    Delta {
        #[serde(default)]
        content: String,
    },
    Reasoning {
        #[serde(default)]
        content: String,
    },
    Complete(Completion),
    Error(StreamFailure),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error(_))
    }
}

/// Per-event callbacks; every method defaults to a no-op
pub trait StreamHandler: Send {
    fn on_start(&mut self, _request_id: Option<&str>) {}
    fn on_delta(&mut self, _content: &str) {}
    fn on_reasoning(&mut self, _content: &str) {}
    fn on_complete(&mut self, _completion: &Completion) {}
    fn on_error(&mut self, _failure: &StreamFailure) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Routes events to a handler and tracks the request state
pub struct Dispatcher<'h, H: StreamHandler + ?Sized> {
    handler: &'h mut H,
    state: StreamState,
    started: bool,
}

impl<'h, H: StreamHandler + ?Sized> Dispatcher<'h, H> {
    pub fn new(handler: &'h mut H) -> Self {
        Self {
            handler,
            state: StreamState::Streaming,
            started: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Dispatch one event; ignored once a terminal event was seen
    pub fn dispatch(&mut self, event: StreamEvent) -> StreamState {
        if self.state.is_terminal() {
            debug!("Event after terminal state ignored");
            return self.state;
        }

        match event {
            StreamEvent::Start { request_id } => {
                if self.started {
                    debug!("Duplicate start event ignored");
                } else {
                    self.started = true;
                    self.handler.on_start(request_id.as_deref());
                }
            }
            StreamEvent::Delta { content } => {
                if !content.is_empty() {
                    self.handler.on_delta(&content);
                }
            }
            StreamEvent::Reasoning { content } => {
                if !content.is_empty() {
                    self.handler.on_reasoning(&content);
                }
            }
            StreamEvent::Complete(completion) => {
                self.state = StreamState::Completed;
                self.handler.on_complete(&completion);
            }
            StreamEvent::Error(failure) => {
                self.state = StreamState::Failed;
                self.handler.on_error(&failure);
            }
        }
        self.state
    }

    /// Terminate with a synthesized error
    pub fn fail(&mut self, message: impl Into<String>) -> StreamState {
        if !self.state.is_terminal() {
            self.state = StreamState::Failed;
            self.handler.on_error(&StreamFailure::new(message));
        }
        self.state
    }

    /// Stop without any further callbacks
    pub fn cancel(&mut self) -> StreamState {
        if !self.state.is_terminal() {
            self.state = StreamState::Cancelled;
        }
        self.state
    }
}

/// Whether a cancel is pending or the handle that could send one is gone
pub(crate) fn shutdown_requested(shutdown: &mut Option<broadcast::Receiver<()>>) -> bool {
    match shutdown.as_mut() {
        Some(rx) => !matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)),
        None => false,
    }
}

/// Decode a response body and dispatch its events until a terminal state
///
/// The body reader is dropped as soon as this returns, whether the stream
/// completed, failed or was cancelled through `shutdown`.
pub async fn drive<S, B, E, H>(
    body: S,
    marker: &str,
    handler: &mut H,
    mut shutdown: Option<broadcast::Receiver<()>>,
) -> StreamState
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: Buf,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
    H: StreamHandler + ?Sized,
{
    let reader = StreamReader::new(body.map(|chunk| chunk.map_err(io::Error::other)));
    let mut frames = FramedRead::new(reader, EventLineCodec::new(marker));
    let mut dispatcher = Dispatcher::new(handler);

    loop {
        let next = match shutdown.as_mut() {
            Some(rx) => tokio::select! {
                _ = rx.recv() => {
                    info!("Stream cancelled");
                    return dispatcher.cancel();
                }
                frame = frames.next() => frame,
            },
            None => frames.next().await,
        };

        match next {
            Some(Ok(Frame::Event(event))) => {
                let state = dispatcher.dispatch(event);
                if state.is_terminal() {
                    debug!(state = ?state, "Stream reached terminal event");
                    return state;
                }
            }
            Some(Ok(Frame::Malformed { line, error })) => {
                warn!(
                    line = %crate::utils::truncate_at_char_boundary(&line, 80),
                    error = %error,
                    "Skipping malformed stream event"
                );
            }
            Some(Err(e)) => {
                if shutdown_requested(&mut shutdown) {
                    return dispatcher.cancel();
                }
                warn!(error = %e, "Stream read failed");
                return dispatcher.fail(format!("stream read failed: {}", e));
            }
            None => {
                if shutdown_requested(&mut shutdown) {
                    return dispatcher.cancel();
                }
                warn!("Stream ended before a terminal event");
                return dispatcher.fail("stream ended before completion");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[derive(Default)]
    struct Recorder {
        content: String,
        reasoning: String,
        starts: usize,
        completions: Vec<Completion>,
        errors: Vec<String>,
    }

    impl StreamHandler for Recorder {
        fn on_start(&mut self, _request_id: Option<&str>) {
            self.starts += 1;
        }
        fn on_delta(&mut self, content: &str) {
            self.content.push_str(content);
        }
        fn on_reasoning(&mut self, content: &str) {
            self.reasoning.push_str(content);
        }
        fn on_complete(&mut self, completion: &Completion) {
            self.completions.push(completion.clone());
        }
        fn on_error(&mut self, failure: &StreamFailure) {
            self.errors.push(failure.message().to_string());
        }
    }

    fn body(chunks: &[&'static str]) -> impl Stream<Item = Result<Bytes, io::Error>> + Unpin {
        tokio_stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_event_wire_format() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"complete","metadata":{"tokens":2}}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Complete(Completion {
                metadata: Some(serde_json::json!({"tokens": 2})),
                ..Default::default()
            })
        );

        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"error","message":"quota","code":429}"#).unwrap();
        assert!(event.is_terminal());
    }

    #[tokio::test]
    async fn test_accumulates_and_stops_after_complete() {
        let mut recorder = Recorder::default();
        let state = drive(
            body(&[
                "data: {\"type\":\"start\"}\n",
                "data: {\"type\":\"delta\",\"content\":\"A\"}\ndata: {\"type\":\"de",
                "lta\",\"content\":\"B\"}\n",
                "data: {\"type\":\"complete\",\"metadata\":{\"tokens\":2}}\n",
                "data: {\"type\":\"delta\",\"content\":\"C\"}\n",
            ]),
            DEFAULT_MARKER,
            &mut recorder,
            None,
        )
        .await;

        assert_eq!(state, StreamState::Completed);
        assert_eq!(recorder.starts, 1);
        assert_eq!(recorder.content, "AB");
        assert_eq!(recorder.completions.len(), 1);
        assert_eq!(
            recorder.completions[0].metadata,
            Some(serde_json::json!({"tokens": 2}))
        );
        assert!(recorder.errors.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_end_stream() {
        let mut recorder = Recorder::default();
        let state = drive(
            body(&[
                "data: garbage\n",
                "data: {\"type\":\"reasoning\",\"content\":\"think\"}\n",
                "data: {\"type\":\"complete\"}\n",
            ]),
            DEFAULT_MARKER,
            &mut recorder,
            None,
        )
        .await;
        assert_eq!(state, StreamState::Completed);
        assert_eq!(recorder.reasoning, "think");
    }

    #[tokio::test]
    async fn test_premature_end_reports_error() {
        let mut recorder = Recorder::default();
        let state = drive(
            body(&["data: {\"type\":\"delta\",\"content\":\"A\"}\n"]),
            DEFAULT_MARKER,
            &mut recorder,
            None,
        )
        .await;
        assert_eq!(state, StreamState::Failed);
        assert_eq!(recorder.errors, vec!["stream ended before completion"]);
        assert!(recorder.completions.is_empty());
    }

    #[tokio::test]
    async fn test_error_event_is_terminal() {
        let mut recorder = Recorder::default();
        let state = drive(
            body(&[
                "data: {\"type\":\"error\",\"message\":\"model overloaded\"}\n",
                "data: {\"type\":\"complete\"}\n",
            ]),
            DEFAULT_MARKER,
            &mut recorder,
            None,
        )
        .await;
        assert_eq!(state, StreamState::Failed);
        assert_eq!(recorder.errors, vec!["model overloaded"]);
        assert!(recorder.completions.is_empty());
    }

    #[tokio::test]
    async fn test_read_error_fails_stream() {
        let mut recorder = Recorder::default();
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"start\"}\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let state = drive(
            tokio_stream::iter(chunks),
            DEFAULT_MARKER,
            &mut recorder,
            None,
        )
        .await;
        assert_eq!(state, StreamState::Failed);
        assert_eq!(recorder.errors.len(), 1);
        assert!(recorder.errors[0].starts_with("stream read failed"));
    }

    #[tokio::test]
    async fn test_cancel_dispatches_nothing_more() {
        let (tx, rx) = broadcast::channel(1);
        let mut recorder = Recorder::default();
        // A body that never yields: only the shutdown signal can end it
        let pending = tokio_stream::pending::<Result<Bytes, io::Error>>();

        tx.send(()).unwrap();
        let state = drive(pending, DEFAULT_MARKER, &mut recorder, Some(rx)).await;

        assert_eq!(state, StreamState::Cancelled);
        assert!(recorder.errors.is_empty());
        assert!(recorder.completions.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_wins_over_truncated_body() {
        let (tx, rx) = broadcast::channel(1);
        let mut recorder = Recorder::default();

        tx.send(()).unwrap();
        let state = drive(
            body(&["data: {\"type\":\"delta\",\"content\":\"A\"}\n"]),
            DEFAULT_MARKER,
            &mut recorder,
            Some(rx),
        )
        .await;

        assert_eq!(state, StreamState::Cancelled);
        assert!(recorder.errors.is_empty());
    }
}
