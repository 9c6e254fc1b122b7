//! Streaming response normalization.
//!
//! Re-frames an upstream chat-completions SSE stream into
//! `data: {"text":"..."}` frames, one per text delta.

pub mod delta;
mod encode;
mod filter;
mod normalizer;
pub mod sse;

pub use delta::{extract, DeltaFragment, DeltaStep, DONE_SENTINEL};
pub use encode::encode_frame;
pub use filter::{FilterState, PrefixFilter, DEFAULT_PREFIX_SKIP};
pub use normalizer::{normalize, NormalizedStream, NormalizerOptions, StreamNormalizer};
pub use sse::{SseEvent, SseParser, DEFAULT_MAX_BUFFERED_BYTES};
