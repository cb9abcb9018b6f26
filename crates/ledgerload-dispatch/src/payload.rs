//! Shared payload decoding for the channel adaptors

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use tracing::{debug, warn};

use ledgerload_core::LoadEvent;

use crate::error::{DispatchError, DispatchResult};

/// Decode a textual payload into an event. Null/empty payloads and
/// non-struct documents decode to `None` (logged, skipped by the caller).
pub(crate) fn event_from_text(item_id: &str, text: &str) -> DispatchResult<Option<LoadEvent>> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "null" {
        debug!(item_id, "empty payload, nothing to apply");
        return Ok(None);
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| DispatchError::Decode(format!("item {item_id}: {e}")))?;
    Ok(event_from_value(item_id, &value))
}

/// Decode an already-parsed document into an event. Non-struct top-level
/// values are logged and skipped.
pub(crate) fn event_from_value(item_id: &str, value: &Value) -> Option<LoadEvent> {
    match LoadEvent::from_value(value) {
        Some(event) => Some(event),
        None => {
            warn!(item_id, "non-struct payload skipped");
            None
        }
    }
}

/// Base64-decode a partitioned-log record body.
pub(crate) fn decode_body(item_id: &str, data: &str) -> DispatchResult<Vec<u8>> {
    BASE64
        .decode(data.trim())
        .map_err(|e| DispatchError::Decode(format!("item {item_id}: {e}")))
}

/// Parse a record body holding one or more concatenated documents.
pub(crate) fn documents_in(item_id: &str, bytes: &[u8]) -> DispatchResult<Vec<Value>> {
    let mut documents = Vec::new();
    for parsed in serde_json::Deserializer::from_slice(bytes).into_iter::<Value>() {
        let value =
            parsed.map_err(|e| DispatchError::Decode(format!("item {item_id}: {e}")))?;
        documents.push(value);
    }
    Ok(documents)
}
