//! Router module for provider selection.
//!
//! Chooses which configured upstream serves an answer stream: the first
//! provider that has an API key.

mod selector;

pub use selector::{Router, SelectedProvider};
