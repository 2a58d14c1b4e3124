//! Query, embed, index and health endpoint tests

mod common;

use axum::http::StatusCode;
use common::{get_json, post_json, test_app, FakeBackend, DIMENSION, FAST_MODEL, HEAVY_MODEL};
use serde_json::json;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_index_then_query_returns_context() {
    let backend = FakeBackend::new("factual");
    let app = test_app(backend);

    let (status, body) = post_json(
        &app,
        "/index",
        &json!({"documents": ["The sky is blue", "Grass is green"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["indexed_count"], 2);
    assert_eq!(body["collection"], "documents");

    let (status, body) = post_json(&app, "/query", &json!({"query": "What color is the sky?"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rag_used"], true);
    assert_eq!(body["route_decision"], "factual");
    assert_eq!(body["model_used"], HEAVY_MODEL);
    assert!(body["context_chunks"].as_u64().unwrap() > 0);

    let contexts: Vec<&str> = body["contexts"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c.as_str())
        .collect();
    assert!(contexts.contains(&"The sky is blue"));
}

#[tokio::test]
async fn test_query_with_metadata_filter() {
    let app = test_app(FakeBackend::new("factual"));

    post_json(
        &app,
        "/index",
        &json!({
            "documents": ["Paris is in France", "Berlin is in Germany"],
            "metadata": [{"lang": "fr"}, {"lang": "de"}]
        }),
    )
    .await;

    let (status, body) = post_json(
        &app,
        "/query",
        &json!({"query": "Which city?", "filter": {"lang": "de"}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context_chunks"], 1);
    assert_eq!(body["contexts"][0], "Berlin is in Germany");
}

#[tokio::test]
async fn test_query_without_rag_uses_fast_backend() {
    let backend = FakeBackend::new("factual");
    let app = test_app(backend);

    post_json(&app, "/index", &json!({"documents": ["The sky is blue"]})).await;
    let (status, body) = post_json(
        &app,
        "/query",
        &json!({"query": "What color is the sky?", "use_rag": false}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rag_used"], false);
    assert_eq!(body["context_chunks"], 0);
    assert_eq!(body["model_used"], FAST_MODEL);
}

#[tokio::test]
async fn test_query_on_empty_corpus_reports_no_rag() {
    let app = test_app(FakeBackend::new("factual"));

    let (status, body) = post_json(&app, "/query", &json!({"query": "Anything?"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rag_used"], false);
    assert_eq!(body["context_chunks"], 0);
}

#[tokio::test]
async fn test_query_validation() {
    let app = test_app(FakeBackend::new("factual"));

    for case in [
        json!({"query": "   "}),
        json!({"query": "Hi", "max_tokens": 0}),
        json!({"query": "Hi", "top_k": 1000}),
        json!({"max_tokens": 10}),
    ] {
        let (status, body) = post_json(&app, "/query", &case).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", case);
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }
}

#[tokio::test]
async fn test_embed_dimension_is_stable() {
    let app = test_app(FakeBackend::new("simple"));

    let (status, first) = post_json(&app, "/embed", &json!({"texts": ["a", "b c"]})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["count"], 2);
    assert_eq!(first["dimension"], DIMENSION);
    assert_eq!(first["embeddings"][0].as_array().unwrap().len(), DIMENSION);

    let (_, second) = post_json(&app, "/embed", &json!({"texts": ["something else entirely"]})).await;
    assert_eq!(second["dimension"], first["dimension"]);
}

#[tokio::test]
async fn test_embed_rejects_empty_input() {
    let app = test_app(FakeBackend::new("simple"));

    let (status, _) = post_json(&app, "/embed", &json!({"texts": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_embed_backend_failure_is_bad_gateway() {
    let backend = FakeBackend::new("simple");
    backend.embed_fails.store(true, Ordering::SeqCst);
    let app = test_app(backend);

    let (status, body) = post_json(&app, "/embed", &json!({"texts": ["x"]})).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "embedding_error");
}

#[tokio::test]
async fn test_index_validation() {
    let app = test_app(FakeBackend::new("simple"));

    let (status, _) = post_json(&app, "/index", &json!({"documents": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        &app,
        "/index",
        &json!({"documents": ["a", "b"], "metadata": [{"k": 1}]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reports_every_service() {
    let app = test_app(FakeBackend::new("simple"));

    let (status, body) = get_json(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    for service in ["fast", "heavy", "embedding", "vector_db"] {
        assert_eq!(body["services"][service]["reachable"], true, "{}", service);
    }
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_liveness_and_info() {
    let app = test_app(FakeBackend::new("simple"));

    let (status, _) = get_json(&app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get_json(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_object());
}
