//! Upstream provider access.
//!
//! Builds and sends the streaming chat-completions request and hands the raw
//! response body to the normalization pipeline in [`crate::stream`].

pub mod provider;
mod requester;
pub mod types;

pub use provider::{ChatCompletionsProvider, ProviderAdapter};
pub use requester::{UpstreamBody, UpstreamRequester};
pub use types::{CompletionRequest, Message};
