//! Error types for chatstream.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Body returned to the client whenever an answer stream cannot be opened.
pub const DEGRADED_BODY: &str = "Error. Answer stream failed.";

/// Status returned alongside [`DEGRADED_BODY`].
pub const DEGRADED_STATUS: StatusCode = StatusCode::ACCEPTED;

/// Result type alias for chatstream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chatstream.
///
/// Every variant aborts the normalization pipeline it occurs in. Nothing is
/// retried here; retrying is up to whoever called us.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("No providers configured")]
    NoProviders,

    #[error("Upstream request failed: {status} {status_text}: {body}")]
    UpstreamRequest {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("Malformed upstream event: {0}")]
    MalformedEvent(String),

    #[error("Upstream API error: {message}")]
    UpstreamApi { message: String },

    #[error("Upstream transport error: {0}")]
    Transport(String),

    #[error("Answer stream exceeded its {0:?} deadline")]
    Timeout(Duration),
}

impl Error {
    /// Short machine-friendly label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::NoProviders => "no_providers",
            Error::UpstreamRequest { .. } => "upstream_request",
            Error::MalformedEvent(_) => "malformed_event",
            Error::UpstreamApi { .. } => "upstream_api",
            Error::Transport(_) => "transport",
            Error::Timeout(_) => "timeout",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Detail stays in the logs; the client only ever sees the fixed body.
        tracing::error!(error = %self, kind = self.kind(), "Answer stream failed");
        (DEGRADED_STATUS, DEGRADED_BODY).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_into_response_hides_detail() {
        let err = Error::UpstreamRequest {
            status: 401,
            status_text: "Unauthorized".to_string(),
            body: "invalid api key sk-live-123".to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&body[..], DEGRADED_BODY.as_bytes());
    }

    #[test]
    fn test_display_includes_status_and_body() {
        let err = Error::UpstreamRequest {
            status: 429,
            status_text: "Too Many Requests".to_string(),
            body: "slow down".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("429"));
        assert!(msg.contains("slow down"));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(
            Error::UpstreamApi {
                message: "x".to_string()
            }
            .kind(),
            "upstream_api"
        );
    }
}
