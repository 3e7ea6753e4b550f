//! HTTP side of the streaming client

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{drive, shutdown_requested, Dispatcher, StreamHandler, StreamState};
use crate::config::ReaderConfig;
use crate::error::{MarginaliaError, Result};

/// Issues generation requests and drives their event streams
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    base_url: String,
    marker: String,
}

impl StreamClient {
    pub fn new(config: &ReaderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.stream.connect_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            marker: config.stream.marker.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Run one request to completion on the current task
    pub async fn stream<B, H>(&self, path: &str, body: &B, handler: &mut H) -> StreamState
    where
        B: Serialize + ?Sized,
        H: StreamHandler + ?Sized,
    {
        self.run(path, body, handler, None).await
    }

    /// Run one request on a background task
    ///
    /// The handler is handed back through [`StreamHandle::join`]. Dropping
    /// the handle cancels the stream.
    pub fn spawn<B, H>(&self, path: &str, body: &B, handler: H) -> Result<StreamHandle<H>>
    where
        B: Serialize + ?Sized,
        H: StreamHandler + 'static,
    {
        let body = serde_json::to_value(body)?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let client = self.clone();
        let path = path.to_string();

        let join = tokio::spawn(async move {
            let mut handler = handler;
            let state = client
                .run(&path, &body, &mut handler, Some(shutdown_rx))
                .await;
            (state, handler)
        });

        Ok(StreamHandle { shutdown_tx, join })
    }

    async fn run<B, H>(
        &self,
        path: &str,
        body: &B,
        handler: &mut H,
        mut shutdown: Option<broadcast::Receiver<()>>,
    ) -> StreamState
    where
        B: Serialize + ?Sized,
        H: StreamHandler + ?Sized,
    {
        let url = self.url(path);
        debug!(url = %url, state = ?StreamState::Connecting, "Opening stream");

        let request = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body)
            .send();

        let sent = match shutdown.as_mut() {
            Some(rx) => tokio::select! {
                _ = rx.recv() => {
                    info!(url = %url, "Stream cancelled while connecting");
                    return Dispatcher::new(handler).cancel();
                }
                sent = request => sent,
            },
            None => request.await,
        };

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                if shutdown_requested(&mut shutdown) {
                    return Dispatcher::new(handler).cancel();
                }
                warn!(url = %url, error = %e, "Stream request failed");
                return Dispatcher::new(handler).fail(format!("request failed: {}", e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            if shutdown_requested(&mut shutdown) {
                return Dispatcher::new(handler).cancel();
            }
            let reason = status.canonical_reason().unwrap_or("unknown status");
            warn!(url = %url, status = status.as_u16(), "Stream request rejected");
            return Dispatcher::new(handler).fail(format!("HTTP {}: {}", status.as_u16(), reason));
        }

        info!(url = %url, "Stream connected");
        drive(Box::pin(response.bytes_stream()), &self.marker, handler, shutdown).await
    }
}

/// Background stream started by [`StreamClient::spawn`]
pub struct StreamHandle<H> {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<(StreamState, H)>,
}

impl<H> StreamHandle<H> {
    /// Ask the stream to stop; no callbacks run after it observes this
    pub fn cancel(&self) {
        // A send error only means the task already finished
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the terminal state and take the handler back
    pub async fn join(self) -> Result<(StreamState, H)> {
        let Self { shutdown_tx, join } = self;
        let result = join
            .await
            .map_err(|e| MarginaliaError::Stream(format!("stream task failed: {}", e)));
        drop(shutdown_tx);
        result
    }
}
