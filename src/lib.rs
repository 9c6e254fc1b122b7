//! chatstream - streaming normalizer for LLM chat-completion answers
//!
//! Opens a streaming chat-completions request against an upstream provider,
//! re-parses its SSE framing, extracts text deltas, drops leading boilerplate
//! and re-emits the text as `data: {"text":"..."}` frames.

pub mod config;
pub mod error;
pub mod proxy;
pub mod router;
pub mod stream;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
pub use stream::{NormalizedStream, NormalizerOptions, StreamNormalizer};
pub use upstream::{ChatCompletionsProvider, CompletionRequest, Message, ProviderAdapter};
