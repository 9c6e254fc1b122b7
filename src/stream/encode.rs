//! Downstream SSE framing.

use bytes::Bytes;

use super::delta::DeltaFragment;

/// Frame `fragment` as `data: {"text":"..."}` followed by a blank line.
pub fn encode_frame(fragment: &DeltaFragment) -> Bytes {
    let payload = serde_json::json!({ "text": fragment.text });
    Bytes::from(format!("data: {}\n\n", payload))
}
