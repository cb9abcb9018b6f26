//! Partitioned-log adaptor for ledger streams
//!
//! A ledger publishes its committed revisions onto a partitioned log.
//! Producers may client-aggregate several user records into one log record
//! (a JSON array), so bodies are de-aggregated first. Only
//! `REVISION_DETAILS` user records are processed; the event is derived
//! from the embedded revision document. No mapper runs here: ledger-to-
//! ledger replication preserves schema.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use ledgerload_core::{LoadEvent, RevisionWriter};

use crate::channel::ChannelDispatcher;
use crate::error::{DispatchError, DispatchResult};
use crate::outcome::{apply_event, ItemOutcome};
use crate::payload;
use crate::stream::StreamRecord;

const RECORD_TYPE_FIELD: &str = "recordType";
const REVISION_DETAILS: &str = "REVISION_DETAILS";

/// Ledger-stream adaptor: de-aggregates, filters to revision details,
/// processes the whole batch, then raises if anything failed.
pub struct LedgerStreamDispatcher {
    writer: Arc<RevisionWriter>,
}

impl LedgerStreamDispatcher {
    pub fn new(writer: Arc<RevisionWriter>) -> Self {
        LedgerStreamDispatcher { writer }
    }

    /// Split a decoded body into user records, flattening client-side
    /// aggregates.
    fn deaggregate(documents: Vec<Value>) -> Vec<Value> {
        let mut user_records = Vec::with_capacity(documents.len());
        for document in documents {
            match document {
                Value::Array(aggregated) => user_records.extend(aggregated),
                other => user_records.push(other),
            }
        }
        user_records
    }

    /// Derive the event carried by one `REVISION_DETAILS` user record.
    /// `Ok(None)` means the record is skippable; `Err` means it is
    /// malformed and counts as a failure.
    fn event_of(item_id: &str, record: &Value) -> Result<Option<LoadEvent>, String> {
        let obj = match record.as_object() {
            Some(obj) => obj,
            None => {
                debug!(item_id, "non-struct user record skipped");
                return Ok(None);
            }
        };

        let record_type = obj.get(RECORD_TYPE_FIELD).and_then(Value::as_str);
        if record_type != Some(REVISION_DETAILS) {
            debug!(item_id, record_type, "uninteresting record type skipped");
            return Ok(None);
        }

        let payload = obj
            .get("payload")
            .ok_or_else(|| format!("item {item_id}: revision record has no payload"))?;
        let table = payload
            .get("tableInfo")
            .and_then(|info| info.get("tableName"))
            .and_then(Value::as_str)
            .ok_or_else(|| format!("item {item_id}: revision record has no table name"))?;
        let revision = payload
            .get("revision")
            .ok_or_else(|| format!("item {item_id}: revision record has no revision"))?;

        LoadEvent::from_committed_revision(table, revision)
            .map(Some)
            .ok_or_else(|| format!("item {item_id}: revision is missing its metadata"))
    }
}

#[async_trait]
impl ChannelDispatcher for LedgerStreamDispatcher {
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
            let user_records = match documents {
                Ok(documents) => Self::deaggregate(documents),
                Err(err) => {
                    total += 1;
                    failed += 1;
                    first_failure.get_or_insert(err.to_string());
                    continue;
                }
            };

            for user_record in &user_records {
                let outcome = match Self::event_of(&item_id, user_record) {
                    Ok(Some(event)) => {
                        total += 1;
                        apply_event(&self.writer, &event, &item_id).await
                    }
                    Ok(None) => continue, // control or foreign record
                    Err(message) => {
                        total += 1;
                        ItemOutcome::Failed(message)
                    }
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
