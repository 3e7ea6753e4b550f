//! REST client against an in-process server

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;

use marginalia_core::services::{ApiClient, Intent, SaveInsightRequest};
use marginalia_core::types::LensType;
use marginalia_core::{MarginaliaError, ReaderConfig};

async fn serve(router: Router) -> ReaderConfig {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let mut config = ReaderConfig::default();
    config.api.base_url = format!("http://{}/", addr);
    config
}

async fn client(router: Router) -> ApiClient {
    ApiClient::new(&serve(router).await).unwrap()
}

#[tokio::test]
async fn test_analysis_report_unwraps_report_data() {
    let api = client(Router::new().route(
        "/api/v1/articles/:id/analysis-report",
        get(|Path(id): Path<i64>| async move {
            Json(json!({
                "article_id": id,
                "report_data": {
                    "summary": format!("article {}", id),
                    "concept_sparks": [
                        {"text": "energy costs", "sentence_index": 1, "importance_score": 9.0}
                    ],
                    "argument_sparks": [
                        {"type": "claim", "text": "Prices climbed", "sentence_index": 0}
                    ],
                    "sentences": ["Prices climbed again.", "Most blame energy costs."]
                }
            }))
        }),
    ))
    .await;

    let report = api.analysis_report(42).await.unwrap();
    assert_eq!(report.summary, "article 42");
    assert_eq!(report.concept_sparks[0].text, "energy costs");
    assert_eq!(report.argument_sparks[0].sentence_index, 0);
    assert_eq!(report.spark_count(), 2);
    assert_eq!(report.sentences.map(|s| s.len()), Some(2));
}

#[tokio::test]
async fn test_thinking_lens_passes_force_flag() {
    let api = client(Router::new().route(
        "/api/v1/articles/:id/thinking-lens/:lens",
        get(
            |Path((id, lens)): Path<(i64, String)>,
             Query(query): Query<HashMap<String, String>>| async move {
                let forced = query.get("force_reanalyze").cloned().unwrap_or_default();
                Json(json!({
                    "status": "completed",
                    "lens_result": {
                        "id": id,
                        "lens_type": lens,
                        "highlights": [{
                            "start": 0,
                            "end": 6,
                            "text": "Prices",
                            "category": "claim"
                        }],
                        "annotations": {"summary": format!("forced={}", forced)}
                    }
                }))
            },
        ),
    ))
    .await;

    let result = api
        .thinking_lens(7, LensType::AuthorStance, true)
        .await
        .unwrap();
    assert_eq!(result.id, 7);
    assert_eq!(result.lens_type, LensType::AuthorStance);
    assert_eq!(result.highlights.len(), 1);
    assert_eq!(result.annotations.summary, "forced=true");

    let result = api
        .thinking_lens(7, LensType::ArgumentStructure, false)
        .await
        .unwrap();
    assert_eq!(result.lens_type, LensType::ArgumentStructure);
    assert_eq!(result.annotations.summary, "forced=false");
}

#[tokio::test]
async fn test_insight_history_sends_article_and_user() {
    let api = client(Router::new().route(
        "/api/v1/insights/history",
        get(|Query(query): Query<HashMap<String, String>>| async move {
            let user = query.get("user_id").cloned().unwrap_or_else(|| "none".into());
            Json(json!({
                "total": 1,
                "insights": [{
                    "id": 3,
                    "selected_text": format!("article {}", query["article_id"]),
                    "intent": "explain",
                    "insight": format!("user {}", user),
                }]
            }))
        }),
    ))
    .await;

    let history = api.insight_history(12, Some(5)).await.unwrap();
    assert_eq!(history.total, 1);
    assert_eq!(history.insights[0].selected_text, "article 12");
    assert_eq!(history.insights[0].insight, "user 5");

    let history = api.insight_history(12, None).await.unwrap();
    assert_eq!(history.insights[0].insight, "user none");
}

#[tokio::test]
async fn test_save_insight_history_posts_record() {
    let api = client(Router::new().route(
        "/api/v1/insights/history",
        post(|Json(body): Json<Value>| async move {
            Json(json!({"id": 99, "echo": body}))
        }),
    ))
    .await;

    let record = SaveInsightRequest {
        article_id: 12,
        user_id: Some(5),
        selected_text: "rate hikes".to_string(),
        selected_start: Some(40),
        selected_end: Some(50),
        context_before: None,
        context_after: None,
        intent: Intent::Counter,
        question: None,
        insight: "Hikes may resume.".to_string(),
        reasoning: None,
    };
    let saved = api.save_insight_history(&record).await.unwrap();
    assert_eq!(saved["id"], 99);
    assert_eq!(saved["echo"]["article_id"], 12);
    assert_eq!(saved["echo"]["intent"], "counter");
    assert_eq!(saved["echo"]["selected_start"], 40);
}

#[tokio::test]
async fn test_request_explanation_sends_concept_and_hint() {
    let api = client(Router::new().route(
        "/api/v1/sparks/explain",
        post(|Json(body): Json<Value>| async move {
            let concept = body["concept"].as_str().unwrap_or_default().to_string();
            let hint = body["hint"].as_str().unwrap_or_default().to_string();
            Json(json!({ "explanation": format!("{}: {}", concept, hint) }))
        }),
    ))
    .await;

    let explanation = api
        .request_explanation("energy costs", "fuel and power")
        .await
        .unwrap();
    assert_eq!(explanation, "energy costs: fuel and power");
    assert_eq!(
        api.explanation_or_hint("energy costs", "fuel and power").await,
        "energy costs: fuel and power"
    );
}

#[tokio::test]
async fn test_explanation_falls_back_to_hint() {
    let api = client(Router::new().route(
        "/api/v1/sparks/explain",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model offline") }),
    ))
    .await;

    assert!(api.request_explanation("energy costs", "fuel").await.is_err());
    assert_eq!(api.explanation_or_hint("energy costs", "fuel").await, "fuel");
}

#[tokio::test]
async fn test_error_status_carries_body_excerpt() {
    let api = client(
        Router::new()
            .route(
                "/api/v1/articles/1/analysis-report",
                get(|| async { (StatusCode::NOT_FOUND, "report not ready") }),
            )
            .route(
                "/api/v1/articles/2/analysis-report",
                get(|| async { (StatusCode::BAD_GATEWAY, "x".repeat(300)) }),
            )
            .route(
                "/api/v1/articles/3/analysis-report",
                get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
            ),
    )
    .await;

    match api.analysis_report(1).await {
        Err(MarginaliaError::HttpStatus { status, reason }) => {
            assert_eq!(status, 404);
            assert_eq!(reason, "report not ready");
        }
        other => panic!("expected HTTP status error, got {:?}", other),
    }

    match api.analysis_report(2).await {
        Err(MarginaliaError::HttpStatus { status, reason }) => {
            assert_eq!(status, 502);
            assert_eq!(reason, format!("{}...", "x".repeat(200)));
        }
        other => panic!("expected HTTP status error, got {:?}", other),
    }

    match api.analysis_report(3).await {
        Err(MarginaliaError::HttpStatus { status, reason }) => {
            assert_eq!(status, 503);
            assert_eq!(reason, "Service Unavailable");
        }
        other => panic!("expected HTTP status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_envelope_is_an_error() {
    let api = client(Router::new().route(
        "/api/v1/articles/:id/analysis-report",
        get(|| async { Json(json!({"report": {}})) }),
    ))
    .await;

    assert!(api.analysis_report(1).await.is_err());
}
