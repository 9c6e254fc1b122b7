//! Text delta extraction from parsed event payloads.

use serde_json::Value;

use crate::error::Error;
use crate::upstream::ProviderAdapter;

/// Terminal sentinel sent by OpenAI-compatible upstreams.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental text carried by one upstream event. May be empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeltaFragment {
    pub text: String,
}

impl DeltaFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// What one event means for the stream.
#[derive(Debug)]
pub enum DeltaStep {
    /// Keep going; forward this fragment.
    Continue(DeltaFragment),
    /// The upstream sent its terminal sentinel.
    EndOfStream,
    /// Abort the stream with this error.
    Fatal(Error),
}

/// Interpret the `data` of one SSE event.
pub fn extract(data: &str, adapter: &dyn ProviderAdapter) -> DeltaStep {
    if data == DONE_SENTINEL {
        return DeltaStep::EndOfStream;
    }

    let chunk: Value = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::error!(error = %e, provider = %adapter.name(), "Parse error in stream");
            return DeltaStep::Fatal(Error::MalformedEvent(e.to_string()));
        }
    };

    if !chunk.is_object() {
        tracing::error!(data = %data, provider = %adapter.name(), "Stream chunk is not a JSON object");
        return DeltaStep::Fatal(Error::MalformedEvent(format!(
            "expected a JSON object, got {}",
            data
        )));
    }

    if let Some(error) = chunk.get("error").filter(|e| is_truthy(e)) {
        tracing::error!(error = %error, provider = %adapter.name(), "API error in stream");
        return DeltaStep::Fatal(Error::UpstreamApi {
            message: error_message(error),
        });
    }

    DeltaStep::Continue(DeltaFragment::new(adapter.extract_delta(&chunk)))
}

/// Text of an OpenAI-style chunk: `choices[0].delta.content`, falling back
/// to `choices[0].text`, falling back to the empty string.
pub fn chat_delta_text(chunk: &Value) -> &str {
    fn non_empty(value: Option<&Value>) -> Option<&str> {
        value.and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    let choice = chunk.get("choices").and_then(|c| c.get(0));
    non_empty(choice.and_then(|c| c.get("delta")).and_then(|d| d.get("content")))
        .or_else(|| non_empty(choice.and_then(|c| c.get("text"))))
        .unwrap_or_default()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        _ => match error.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => error.to_string(),
        },
    }
}
