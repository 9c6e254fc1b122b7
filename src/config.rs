//! Configuration parsing and validation for chatstream.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:3000")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Upper bound on requests being dispatched at the same time
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_max_concurrent_requests() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

/// Tuning for the normalization pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Number of leading fragments eligible for newline-prefix suppression
    #[serde(default = "default_prefix_skip")]
    pub prefix_skip: u32,
    /// Wall-clock ceiling for one answer stream, dispatch included
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Largest SSE line or event the parser will hold before giving up
    #[serde(default = "default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,
}

fn default_prefix_skip() -> u32 {
    crate::stream::DEFAULT_PREFIX_SKIP
}

fn default_max_duration_secs() -> u64 {
    60
}

fn default_max_buffered_bytes() -> usize {
    crate::stream::DEFAULT_MAX_BUFFERED_BYTES
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            prefix_skip: default_prefix_skip(),
            max_duration_secs: default_max_duration_secs(),
            max_buffered_bytes: default_max_buffered_bytes(),
        }
    }
}

impl StreamConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

/// API key wrapper backed by [`SecretString`].
///
/// Debug, Display and Serialize all print `[REDACTED]`; the only way to the
/// raw value is [`ApiKey::expose_secret`].
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ApiKey::from)
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// Where a provider's API key came from.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Literal string in the config file
    Literal,
    /// Contained `${VAR}` references expanded from the environment
    EnvExpanded,
    /// Picked up from the convention env var (holds the var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Wire dialect spoken by an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI or Azure OpenAI: bearer auth plus an `api-key` header
    #[default]
    OpenAi,
    /// Together AI: bearer auth only
    Together,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Together => "together",
        })
    }
}

/// Upstream provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Unique name for this provider
    pub name: String,
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL, without the trailing `/chat/completions`
    pub url: String,
    pub api_key: Option<ApiKey>,
    /// Appended as `?api-version=` when set (Azure deployments)
    pub api_version: Option<String>,
    /// Model name sent upstream
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, without env expansion.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = read_config_file(path.as_ref())?;
        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string, without env expansion.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            tracing::warn!("No providers configured - every answer stream will fail");
        } else if self.providers.iter().all(|p| p.api_key.is_none()) {
            tracing::warn!("No provider has an API key - every answer stream will fail");
        }

        if self.stream.max_duration_secs == 0 {
            return Err(ConfigError::Validation(
                "stream.max_duration_secs must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Provider with empty name".to_string(),
                ));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate provider name '{}'",
                    provider.name
                )));
            }
            if provider.url.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has empty URL",
                    provider.name
                )));
            }
            if provider.model.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has empty model",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },

    #[error("Provider '{provider}' has no {field} configured")]
    Missing {
        provider: String,
        field: &'static str,
    },
}

/// Provider config as written in the file; `url` and `api_key` may still
/// hold `${VAR}` references.
#[derive(Deserialize)]
pub struct RawProviderConfig {
    name: String,
    #[serde(default)]
    kind: ProviderKind,
    url: String,
    api_key: Option<String>,
    api_version: Option<String>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

/// Config as written in the file, before env expansion.
#[derive(Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    stream: StreamConfig,
    #[serde(default)]
    providers: Vec<RawProviderConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand every `${VAR}` in `input` through `lookup`.
///
/// Fails on the first missing variable, an unclosed `${`, or an empty name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            return Err(ConfigError::EnvVar {
                var: "<unclosed>".to_string(),
                provider: provider_name.to_string(),
                message: format!("Unclosed '${{' in config value: {}", input),
            });
        };

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: String::new(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        match lookup(var_name) {
            Some(value) => result.push_str(&value),
            None => {
                return Err(ConfigError::EnvVar {
                    var: var_name.to_string(),
                    provider: provider_name.to_string(),
                    message: format!("'{}' is not set in the environment", var_name),
                })
            }
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

fn expand_env_vars(input: &str, provider_name: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, provider_name, |name| std::env::var(name).ok())
}

/// Convention env var consulted when a provider has no `api_key` entry.
///
/// "openai" -> "CHATSTREAM_OPENAI_API_KEY", "together-ai" -> "CHATSTREAM_TOGETHER_AI_API_KEY".
pub fn convention_env_var_name(provider_name: &str) -> String {
    let upper_snake = provider_name.to_uppercase().replace(['-', ' '], "_");
    format!("CHATSTREAM_{}_API_KEY", upper_snake)
}

fn convention_key_lookup(provider_name: &str) -> Option<(String, String)> {
    let var_name = convention_env_var_name(provider_name);
    match std::env::var(&var_name) {
        Ok(value) if !value.is_empty() => Some((var_name, value)),
        _ => None,
    }
}

impl Config {
    /// Turn a [`RawConfig`] into a [`Config`], expanding env references.
    ///
    /// Returns the per-provider [`KeySource`] alongside the config so callers
    /// can report where each key came from.
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let mut providers = Vec::with_capacity(raw.providers.len());
        let mut key_sources = Vec::with_capacity(raw.providers.len());

        for rp in raw.providers {
            let url = expand_env_vars(&rp.url, &rp.name)?;

            let (api_key, source) = match rp.api_key {
                Some(ref raw_key) if raw_key.contains("${") => {
                    let expanded = expand_env_vars(raw_key, &rp.name)?;
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
                Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
                None => match convention_key_lookup(&rp.name) {
                    Some((var_name, value)) => {
                        (Some(ApiKey::from(value)), KeySource::Convention(var_name))
                    }
                    None => (None, KeySource::None),
                },
            };

            key_sources.push((rp.name.clone(), source));

            providers.push(ProviderConfig {
                name: rp.name,
                kind: rp.kind,
                url,
                api_key,
                api_version: rp.api_version,
                model: rp.model,
                temperature: rp.temperature,
                max_tokens: rp.max_tokens,
            });
        }

        let config = Config {
            server: raw.server,
            stream: raw.stream,
            providers,
            logging: raw.logging,
        };

        Ok((config, key_sources))
    }

    /// Load a config file with env expansion and convention key lookup.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = read_config_file(path.as_ref())?;
        let raw: RawConfig = toml::from_str(&content)?;
        let (config, key_sources) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, key_sources))
    }
}
