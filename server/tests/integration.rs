//! Integration tests for the HTTP surface

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use server::config::ServerConfig;

use common::*;

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();
    let response = app.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["engine_ready"], true);
}

#[tokio::test]
async fn test_health_reports_unavailable_engine() {
    let app = TestApp::without_engine();
    let response = app.get("/healthz").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["engine_ready"], false);
}

#[tokio::test]
async fn test_api_prefix() {
    let app = TestApp::new();
    assert_eq!(app.get("/api/health").await.status(), StatusCode::OK);
    assert_eq!(app.get("/api/voices").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_list_voices() {
    let app = TestApp::new();
    let response = app.get("/voices").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["model"], "echo");
    assert_eq!(body["voices"], json!(["en_US"]));
}

#[tokio::test]
async fn test_list_voices_detail() {
    let app = TestApp::new();
    let response = app.get("/voices/detail").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body[0]["id"], "en_US");
    assert_eq!(body[0]["display_name"], "Echo");
    assert_eq!(body[0]["quality"], "low");
}

#[tokio::test]
async fn test_list_voices_detail_empty_without_engine() {
    let app = TestApp::without_engine();
    let body = body_json(app.get("/api/voices/detail").await).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_tts_wav_miss_then_hit() {
    let app = TestApp::new();
    let request = json!({ "text": "hello", "format": "wav" });

    let first = app.post_json("/tts", request.clone()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "content-type"), Some("audio/wav"));
    assert_eq!(header(&first, "x-cache"), Some("miss"));
    assert_eq!(header(&first, "content-length"), Some("16"));
    assert_eq!(body_bytes(first).await.as_ref(), b"RIFF|hello|en_US");

    let second = app.post_json("/tts", request).await;
    assert_eq!(header(&second, "x-cache"), Some("hit"));
    assert_eq!(body_bytes(second).await.as_ref(), b"RIFF|hello|en_US");
    assert_eq!(app.engine.calls(), 1);
}

#[tokio::test]
async fn test_tts_defaults_to_mp3() {
    let app = TestApp::new();
    let response = app.post_json("/tts", json!({ "text": "hello" })).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("audio/mpeg"));
    assert_eq!(body_bytes(response).await.as_ref(), b"ID3|RIFF|hello|en_US");
}

#[tokio::test]
async fn test_tts_format_is_case_insensitive() {
    let app = TestApp::new();
    let response = app
        .post_json("/tts", json!({ "text": "hello", "format": "WAV" }))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("audio/wav"));
}

#[tokio::test]
async fn test_tts_transcode_failure_falls_back_to_wav() {
    let app = TestApp::without_transcoder();
    let request = json!({ "text": "hello", "format": "mp3" });

    let first = app.post_json("/tts", request.clone()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "content-type"), Some("audio/wav"));
    assert_eq!(header(&first, "x-cache"), Some("fallback"));
    assert_eq!(body_bytes(first).await.as_ref(), b"RIFF|hello|en_US");

    // Fallback audio is never cached under the mp3 key.
    let second = app.post_json("/tts", request).await;
    assert_eq!(header(&second, "x-cache"), Some("fallback"));
    assert_eq!(app.engine.calls(), 2);
}

#[tokio::test]
async fn test_tts_validation_errors() {
    let app = TestApp::new();

    let cases = [
        (json!({ "text": "   " }), StatusCode::BAD_REQUEST),
        (
            json!({ "text": "hello", "format": "ogg" }),
            StatusCode::BAD_REQUEST,
        ),
        (
            json!({ "text": "a".repeat(2001) }),
            StatusCode::PAYLOAD_TOO_LARGE,
        ),
    ];
    for (request, status) in cases {
        let response = app.post_json("/tts", request.clone()).await;
        assert_eq!(response.status(), status, "{request}");
        let body = body_json(response).await;
        assert_eq!(body["kind"], "invalid_request");
        assert_eq!(body["code"], status.as_u16());
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    }
    assert_eq!(app.engine.calls(), 0);
}

#[tokio::test]
async fn test_tts_text_at_limit_is_accepted() {
    let app = TestApp::new();
    let response = app
        .post_json("/tts", json!({ "text": "a".repeat(2000), "format": "wav" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_tts_engine_unavailable() {
    let app = TestApp::without_engine();
    let response = app.post_json("/tts", json!({ "text": "hello" })).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "engine_unavailable");
}

#[tokio::test]
async fn test_tts_engine_error() {
    let app = TestApp::new();
    let response = app
        .post_json("/tts", json!({ "text": "hello", "voice": "ghost" }))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "engine_error");
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_request_id_header() {
    let app = TestApp::new();

    let ok = app.get("/health").await;
    let failed = app.post_json("/tts", json!({ "text": "" })).await;

    for response in [ok, failed] {
        let id = header(&response, "x-request-id").expect("x-request-id header");
        assert_eq!(id.len(), 36);
    }
}

#[tokio::test]
async fn test_metrics_count_cache_outcomes() {
    let app = TestApp::new();
    let request = json!({ "text": "count me", "format": "wav" });
    app.post_json("/tts", request.clone()).await;
    app.post_json("/tts", request).await;
    app.post_json("/tts", json!({ "text": "" })).await;

    let response = app.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["tts"]["request_count"], 3);
    assert_eq!(body["tts"]["error_count"], 1);
    assert_eq!(body["cache"]["hits"], 1);
    assert_eq!(body["cache"]["misses"], 1);
    assert_eq!(body["system"]["request_count"], 3);
    assert_eq!(body["in_flight"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tts_engine_timeout_is_not_masked_by_request_timeout() {
    // The general request timeout is shorter than the engine timeout here.
    let config = ServerConfig {
        request_timeout_secs: 0,
        ..ServerConfig::default()
    };
    let app = TestApp::with_slow_engine(
        Duration::from_millis(300),
        Duration::from_millis(50),
        config,
    );

    let response = app
        .post_json("/tts", json!({ "text": "slow", "format": "wav" }))
        .await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(header(&response, "content-type"), Some("application/json"));
    let body = body_json(response).await;
    assert_eq!(body["kind"], "engine_timeout");
    assert_eq!(body["code"], 504);
}
