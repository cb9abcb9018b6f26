//! Partitioned-log adaptor (generic)
//!
//! Each record body is base64-encoded and carries one or more canonical
//! event documents, concatenated. The entire batch is processed before any
//! raise so a temporarily-bad event cannot block later records on the same
//! shard; at the end, any failure raises a batch-level error for the
//! channel to retry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ledgerload_core::RevisionWriter;

use crate::channel::ChannelDispatcher;
use crate::error::{DispatchError, DispatchResult};
use crate::outcome::{apply_event, ItemOutcome};
use crate::payload;

/// One partitioned-log record as delivered by the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(default)]
    pub partition_key: Option<String>,
    #[serde(default)]
    pub sequence_number: Option<String>,
    /// Base64-encoded record body.
    pub data: String,
}

impl StreamRecord {
    /// Best identity available for diagnostics.
    pub(crate) fn item_id(&self, index: usize) -> String {
        self.sequence_number
            .clone()
            .or_else(|| self.partition_key.clone())
            .unwrap_or_else(|| format!("record-{index}"))
    }
}

/// Generic partitioned-log adaptor.
pub struct StreamDispatcher {
    writer: Arc<RevisionWriter>,
}

impl StreamDispatcher {
    pub fn new(writer: Arc<RevisionWriter>) -> Self {
        StreamDispatcher { writer }
    }
}

#[async_trait]
impl ChannelDispatcher for StreamDispatcher {
    type Batch = Vec<StreamRecord>;
    type Response = ();

    async fn dispatch(&self, batch: Self::Batch) -> DispatchResult<Self::Response> {
        let mut total = 0usize;
        let mut failed = 0usize;
        let mut first_failure: Option<String> = None;

        for (index, record) in batch.iter().enumerate() {
            let item_id = record.item_id(index);
            let documents = payload::decode_body(&item_id, &record.data)
                .and_then(|bytes| payload::documents_in(&item_id, &bytes));
            let documents = match documents {
                Ok(documents) => documents,
                Err(err) => {
                    total += 1;
                    failed += 1;
                    first_failure.get_or_insert(err.to_string());
                    continue;
                }
            };

            for document in &documents {
                total += 1;
                let outcome = match payload::event_from_value(&item_id, document) {
                    Some(event) => apply_event(&self.writer, &event, &item_id).await,
                    None => ItemOutcome::Skipped,
                };
                if let ItemOutcome::Failed(message) = outcome {
                    failed += 1;
                    first_failure.get_or_insert(message);
                }
            }
        }

        match first_failure {
            Some(first) => Err(DispatchError::BatchFailed {
                failed,
                total,
                first,
            }),
            None => Ok(()),
        }
    }
}
