//! Pub/sub topic adaptor
//!
//! One event per record. The whole batch is processed before anything is
//! raised, so one bad record cannot shadow the rest; any failure then
//! surfaces as an error and the channel retries, eventually dead-lettering.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ledgerload_core::RevisionWriter;

use crate::channel::ChannelDispatcher;
use crate::error::{DispatchError, DispatchResult};
use crate::outcome::{apply_event, ItemOutcome};
use crate::payload;

/// One topic record as delivered by the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRecord {
    pub message_id: String,
    pub message: String,
}

/// Topic adaptor: exhaust the batch, then raise if anything failed.
pub struct TopicDispatcher {
    writer: Arc<RevisionWriter>,
}

impl TopicDispatcher {
    pub fn new(writer: Arc<RevisionWriter>) -> Self {
        TopicDispatcher { writer }
    }
}

#[async_trait]
impl ChannelDispatcher for TopicDispatcher {
    type Batch = Vec<TopicRecord>;
    type Response = ();

    async fn dispatch(&self, batch: Self::Batch) -> DispatchResult<Self::Response> {
        let total = batch.len();
        let mut failed = 0usize;
        let mut first_failure: Option<String> = None;

        for record in &batch {
            let outcome = match payload::event_from_text(&record.message_id, &record.message) {
                Ok(Some(event)) => apply_event(&self.writer, &event, &record.message_id).await,
                Ok(None) => ItemOutcome::Skipped,
                Err(err) => ItemOutcome::Failed(err.to_string()),
            };
            if let ItemOutcome::Failed(message) = outcome {
                failed += 1;
                first_failure.get_or_insert(message);
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
