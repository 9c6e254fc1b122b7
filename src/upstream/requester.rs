//! Dispatch of the streaming chat-completions request.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;

use super::provider::ProviderAdapter;
use super::types::CompletionRequest;
use crate::error::{Error, Result};

/// Raw upstream response body, as a stream of transport chunks.
pub type UpstreamBody = BoxStream<'static, Result<Bytes>>;

/// Issues one POST per call against a single provider.
#[derive(Clone)]
pub struct UpstreamRequester {
    client: Client,
    adapter: Arc<dyn ProviderAdapter>,
}

impl UpstreamRequester {
    pub fn new(client: Client, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self { client, adapter }
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    /// Send `request` and hand back the open response body.
    ///
    /// Non-2xx answers are drained as text and returned as
    /// [`Error::UpstreamRequest`].
    pub async fn send(&self, request: &CompletionRequest) -> Result<UpstreamBody> {
        let builder = self.adapter.build_request(&self.client, request)?;

        tracing::info!(
            provider = %self.adapter.name(),
            url = %self.adapter.endpoint(),
            model = %request.model,
            messages = request.messages.len(),
            "Initiating upstream stream request"
        );

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, provider = %self.adapter.name(), "Failed to reach provider");
            Error::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        provider = %self.adapter.name(),
                        "Failed to read error response body"
                    );
                    String::new()
                }
            };
            tracing::error!(
                status = %status,
                provider = %self.adapter.name(),
                body = %body,
                "Stream request failed"
            );
            return Err(Error::UpstreamRequest {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            });
        }

        tracing::debug!(provider = %self.adapter.name(), status = %status, "Upstream stream opened");

        Ok(response
            .bytes_stream()
            .map_err(|e| Error::Transport(e.to_string()))
            .boxed())
    }
}
