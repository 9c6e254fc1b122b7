//! Integration tests for POST /api/getChat.
//!
//! Verifies that:
//! - A healthy upstream yields `text/event-stream` frames with a request id
//! - Failures before the stream opens return the fixed degraded response
//! - Failures after the stream opened abort the response body
//! - The configured provider model and sampling settings reach the upstream

use std::sync::Arc;

use axum::body::Body;
use http::{header, Request, StatusCode};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatstream::config::{Config, ProviderConfig, ProviderKind, ServerConfig};
use chatstream::error::DEGRADED_BODY;
use chatstream::proxy::{create_router, AppState, REQUEST_ID_HEADER};
use chatstream::router::Router as ProviderRouter;

fn provider_config(server: &MockServer, key: Option<&str>) -> ProviderConfig {
    ProviderConfig {
        name: "mock".to_string(),
        kind: ProviderKind::Together,
        url: server.uri(),
        api_key: key.map(Into::into),
        api_version: None,
        model: "mistralai/Mixtral-8x7B-Instruct-v0.1".to_string(),
        temperature: Some(0.7),
        max_tokens: Some(512),
    }
}

fn setup_app(providers: Vec<ProviderConfig>) -> axum::Router {
    let config = Config {
        server: ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            max_concurrent_requests: 8,
        },
        stream: Default::default(),
        providers,
        logging: Default::default(),
    };

    let state = AppState {
        router: Arc::new(ProviderRouter::new(&config.providers)),
        http_client: reqwest::Client::new(),
        config: Arc::new(config),
    };

    create_router(state)
}

fn chat_request() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/getChat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"messages":[{"role":"user","content":"Tell me a joke"}]}"#,
        ))
        .unwrap()
}

fn sse_body(events: &[&str]) -> String {
    events
        .iter()
        .map(|data| format!("data: {}\n\n", data))
        .collect()
}

#[tokio::test]
async fn test_streams_normalized_frames() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "model": "mistralai/Mixtral-8x7B-Instruct-v0.1",
            "stream": true,
            "max_tokens": 512,
            "messages": [{"role": "user", "content": "Tell me a joke"}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&[
                    r#"{"choices":[{"delta":{"content":"Assistant:\n"}}]}"#,
                    r#"{"choices":[{"delta":{"content":"Why did"}}]}"#,
                    r#"{"choices":[{"delta":{"content":" the \"crab\"\ncross?"}}]}"#,
                    "[DONE]",
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = setup_app(vec![provider_config(&server, Some("tg-test"))]);
    let response = app.oneshot(chat_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    assert_eq!(
        std::str::from_utf8(&body).unwrap(),
        "data: {\"text\":\"Why did\"}\n\ndata: {\"text\":\" the \\\"crab\\\"\\ncross?\"}\n\n"
    );
}

#[tokio::test]
async fn test_upstream_error_status_degrades() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let app = setup_app(vec![provider_config(&server, Some("tg-test"))]);
    let response = app.oneshot(chat_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    assert_eq!(&body[..], DEGRADED_BODY.as_bytes());
}

#[tokio::test]
async fn test_missing_key_degrades_without_upstream_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = setup_app(vec![provider_config(&server, None)]);
    let response = app.oneshot(chat_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    assert_eq!(&body[..], DEGRADED_BODY.as_bytes());
}

#[tokio::test]
async fn test_no_providers_degrades() {
    let app = setup_app(vec![]);
    let response = app.oneshot(chat_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    assert_eq!(&body[..], DEGRADED_BODY.as_bytes());
}

#[tokio::test]
async fn test_mid_stream_error_aborts_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&[
                    r#"{"choices":[{"delta":{"content":"Hi"}}]}"#,
                    r#"{"error":{"message":"overloaded"}}"#,
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = setup_app(vec![provider_config(&server, Some("tg-test"))]);
    let response = app.oneshot(chat_request()).await.unwrap();

    // Headers were already committed as a stream.
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024).await;
    assert!(body.is_err(), "body should fail after the upstream error");
}

#[tokio::test]
async fn test_invalid_body_rejected() {
    let app = setup_app(vec![]);
    let request = Request::builder()
        .method("POST")
        .uri("/api/getChat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"prompt":"no messages"}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app(vec![]);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "chatstream");
}
