//! Provider selection logic.

use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::upstream::{ChatCompletionsProvider, CompletionRequest, Message, ProviderAdapter};

/// A provider ready to serve a request.
#[derive(Debug, Clone)]
pub struct SelectedProvider {
    pub name: String,
    pub adapter: Arc<ChatCompletionsProvider>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl From<&ProviderConfig> for SelectedProvider {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            adapter: Arc::new(ChatCompletionsProvider::from(config)),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

impl SelectedProvider {
    /// Build the upstream request for `messages` with this provider's model settings.
    pub fn completion_request(&self, messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest::new(self.model.clone(), messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    /// The adapter as the trait object the pipeline consumes.
    pub fn adapter(&self) -> Arc<dyn ProviderAdapter> {
        self.adapter.clone()
    }
}

/// Picks the provider for each answer stream.
#[derive(Debug, Clone)]
pub struct Router {
    providers: Vec<SelectedProvider>,
}

impl Router {
    pub fn new(providers: &[ProviderConfig]) -> Self {
        Self {
            providers: providers.iter().map(SelectedProvider::from).collect(),
        }
    }

    /// Select the provider for a request.
    ///
    /// The first provider, in config order, that has an API key wins. When
    /// none has one the last provider is returned anyway, so the request
    /// fails with a configuration error naming it.
    pub fn select(&self) -> Result<SelectedProvider> {
        if let Some(provider) = self.providers.iter().find(|p| p.adapter.has_api_key()) {
            tracing::debug!(provider = %provider.name, "Selected provider with API key");
            return Ok(provider.clone());
        }

        let fallback = self.providers.last().ok_or(Error::NoProviders)?;
        tracing::warn!(provider = %fallback.name, "No provider has an API key, using last configured");
        Ok(fallback.clone())
    }

    pub fn providers(&self) -> &[SelectedProvider] {
        &self.providers
    }
}
