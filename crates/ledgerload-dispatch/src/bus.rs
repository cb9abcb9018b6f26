//! Event-bus adaptor
//!
//! The bus delivers a single record whose `detail` field carries the
//! event. Any failure raises immediately; the bus retries and eventually
//! dead-letters.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ledgerload_core::RevisionWriter;

use crate::channel::ChannelDispatcher;
use crate::error::{DispatchError, DispatchResult};
use crate::outcome::{apply_event, ItemOutcome};
use crate::payload;

/// A bus delivery envelope. Fields other than `detail` are carried for
/// diagnostics only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "detail-type")]
    pub detail_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub detail: Value,
}

/// Bus adaptor: single record, raise on any fail.
pub struct BusDispatcher {
    writer: Arc<RevisionWriter>,
}

impl BusDispatcher {
    pub fn new(writer: Arc<RevisionWriter>) -> Self {
        BusDispatcher { writer }
    }
}

#[async_trait]
impl ChannelDispatcher for BusDispatcher {
    type Batch = BusEnvelope;
    type Response = ();

    async fn dispatch(&self, envelope: Self::Batch) -> DispatchResult<Self::Response> {
        let item_id = envelope.id.as_deref().unwrap_or("bus-event");

        let event = match payload::event_from_value(item_id, &envelope.detail) {
            Some(event) => event,
            None => return Ok(()), // logged and skipped
        };

        match apply_event(&self.writer, &event, item_id).await {
            ItemOutcome::Failed(message) => Err(DispatchError::ItemFailed {
                item_id: item_id.to_string(),
                message,
            }),
            _ => Ok(()),
        }
    }
}
