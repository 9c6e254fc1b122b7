//! HTTP request handlers.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use futures::TryStreamExt;
use serde::Deserialize;
use tracing::Instrument;
use uuid::Uuid;

use super::server::AppState;
use crate::error::Result;
use crate::stream::{NormalizerOptions, StreamNormalizer};
use crate::upstream::Message;

/// Response header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Body of `POST /api/getChat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

/// Handle POST /api/getChat
///
/// Streams normalized `data: {"text":...}` frames. Failures before the
/// stream opens become the fixed degraded response; failures after it
/// opened abort the body.
pub async fn get_chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("get_chat", %request_id);

    let mut response = match open_answer_stream(&state, body, request_id)
        .instrument(span.clone())
        .await
    {
        Ok(response) => response,
        Err(e) => span.in_scope(|| e.into_response()),
    };

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn open_answer_stream(
    state: &AppState,
    body: ChatRequest,
    request_id: Uuid,
) -> Result<Response> {
    let provider = state.router.select()?;

    tracing::info!(
        provider = %provider.name,
        model = %provider.model,
        messages = body.messages.len(),
        "Fetching answer stream"
    );

    let normalizer = StreamNormalizer::new(
        state.http_client.clone(),
        provider.adapter(),
        NormalizerOptions::from(&state.config.stream),
    );
    let request = provider.completion_request(body.messages);
    let stream = normalizer.open(&request).await?.inspect_err(move |e| {
        tracing::error!(%request_id, error = %e, kind = e.kind(), "Answer stream aborted");
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatstream"
    }))
}
