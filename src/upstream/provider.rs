//! Provider adapters.
//!
//! The normalization pipeline is the same for every upstream; the only
//! provider-specific pieces are how the HTTP request is built and where the
//! text delta lives in a streamed chunk. [`ProviderAdapter`] captures exactly
//! those two capabilities.

use reqwest::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use super::types::CompletionRequest;
use crate::config::{ApiKey, ConfigError, ProviderConfig, ProviderKind};
use crate::error::Result;

/// Secondary auth header understood by Azure OpenAI deployments.
const AZURE_API_KEY_HEADER: HeaderName = HeaderName::from_static("api-key");

/// Provider-specific behavior plugged into the generic pipeline.
pub trait ProviderAdapter: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Target URL of the streaming POST.
    fn endpoint(&self) -> String;

    /// Build the streaming POST for `request`.
    ///
    /// Must fail with a configuration error, without touching the network,
    /// when the provider lacks a key or base URL.
    fn build_request(&self, client: &Client, request: &CompletionRequest)
        -> Result<RequestBuilder>;

    /// Pull the text delta out of one parsed stream chunk.
    fn extract_delta(&self, chunk: &Value) -> String {
        crate::stream::delta::chat_delta_text(chunk).to_string()
    }
}

/// An OpenAI-style `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsProvider {
    name: String,
    kind: ProviderKind,
    base_url: String,
    api_key: Option<ApiKey>,
    api_version: Option<String>,
}

impl ChatCompletionsProvider {
    pub fn new(
        name: impl Into<String>,
        kind: ProviderKind,
        base_url: impl Into<String>,
        api_key: Option<ApiKey>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            base_url: base_url.into(),
            api_key,
            api_version: None,
        }
    }

    pub fn with_api_version(mut self, api_version: Option<String>) -> Self {
        self.api_version = api_version.filter(|v| !v.is_empty());
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }

    /// Full endpoint URL, including `api-version` when configured.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match &self.api_version {
            Some(version) => format!("{}/chat/completions?api-version={}", base, version),
            None => format!("{}/chat/completions", base),
        }
    }

    fn missing(&self, field: &'static str) -> ConfigError {
        ConfigError::Missing {
            provider: self.name.clone(),
            field,
        }
    }
}

impl From<&ProviderConfig> for ChatCompletionsProvider {
    fn from(config: &ProviderConfig) -> Self {
        ChatCompletionsProvider::new(
            config.name.clone(),
            config.kind,
            config.url.clone(),
            config.api_key.clone(),
        )
        .with_api_version(config.api_version.clone())
    }
}

impl ProviderAdapter for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> String {
        ChatCompletionsProvider::endpoint(self)
    }

    fn build_request(
        &self,
        client: &Client,
        request: &CompletionRequest,
    ) -> Result<RequestBuilder> {
        let api_key = match &self.api_key {
            Some(key) if !key.expose_secret().is_empty() => key,
            _ => return Err(self.missing("API key").into()),
        };
        if self.base_url.trim().is_empty() {
            return Err(self.missing("base URL").into());
        }

        let mut builder = client
            .post(self.endpoint())
            .header(CONTENT_TYPE, "application/json")
            .header(
                AUTHORIZATION,
                format!("Bearer {}", api_key.expose_secret()),
            );

        if self.kind == ProviderKind::OpenAi {
            builder = builder.header(AZURE_API_KEY_HEADER, api_key.expose_secret());
        }

        Ok(builder.json(&request.streaming_body()))
    }
}
