//! REST client for annotation payloads and insight history

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::generation::SaveInsightRequest;
use crate::config::ReaderConfig;
use crate::error::{MarginaliaError, Result};
use crate::types::{AnalysisReport, InsightHistoryItem, LensResult, LensType};

#[derive(Debug, Deserialize)]
struct ReportEnvelope {
    report_data: AnalysisReport,
}

#[derive(Debug, Deserialize)]
struct LensEnvelope {
    #[serde(default)]
    status: Option<String>,
    lens_result: LensResult,
}

/// Insight history page
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InsightHistory {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub insights: Vec<InsightHistoryItem>,
}

#[derive(Debug, Serialize)]
struct ExplainRequest<'a> {
    hint: &'a str,
    concept: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExplainResponse {
    explanation: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ReaderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarginaliaError::HttpStatus {
                status: status.as_u16(),
                reason: if body.is_empty() {
                    status.canonical_reason().unwrap_or("unknown").to_string()
                } else {
                    crate::utils::truncate_at_char_boundary(&body, 200)
                },
            });
        }
        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let response = self.http.get(&url).query(query).send().await?;
        Self::decode(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let response = self.http.post(&url).json(body).send().await?;
        Self::decode(response).await
    }

    /// Concept/argument sparks (and optionally the backend sentence split)
    pub async fn analysis_report(&self, article_id: i64) -> Result<AnalysisReport> {
        let envelope: ReportEnvelope = self
            .get(&format!("/api/v1/articles/{}/analysis-report", article_id), &[])
            .await?;
        Ok(envelope.report_data)
    }

    pub async fn thinking_lens(
        &self,
        article_id: i64,
        lens: LensType,
        force_reanalyze: bool,
    ) -> Result<LensResult> {
        let envelope: LensEnvelope = self
            .get(
                &format!("/api/v1/articles/{}/thinking-lens/{}", article_id, lens),
                &[("force_reanalyze", force_reanalyze.to_string())],
            )
            .await?;
        debug!(
            lens = %lens,
            status = envelope.status.as_deref().unwrap_or("unknown"),
            highlights = envelope.lens_result.highlights.len(),
            "Thinking lens fetched"
        );
        Ok(envelope.lens_result)
    }

    pub async fn insight_history(
        &self,
        article_id: i64,
        user_id: Option<i64>,
    ) -> Result<InsightHistory> {
        let mut query = vec![("article_id", article_id.to_string())];
        if let Some(user_id) = user_id {
            query.push(("user_id", user_id.to_string()));
        }
        self.get("/api/v1/insights/history", &query).await
    }

    pub async fn save_insight_history(&self, record: &SaveInsightRequest) -> Result<serde_json::Value> {
        self.post("/api/v1/insights/history", record).await
    }

    /// Ask the backend to expand a concept spark's hint
    pub async fn request_explanation(&self, concept: &str, hint: &str) -> Result<String> {
        let response: ExplainResponse = self
            .post("/api/v1/sparks/explain", &ExplainRequest { hint, concept })
            .await?;
        Ok(response.explanation)
    }

    /// Explanation, or the hint itself when the request fails
    pub async fn explanation_or_hint(&self, concept: &str, hint: &str) -> String {
        match self.request_explanation(concept, hint).await {
            Ok(explanation) => explanation,
            Err(e) => {
                warn!(concept = %concept, error = %e, "Explanation request failed, using hint");
                hint.to_string()
            }
        }
    }
}
