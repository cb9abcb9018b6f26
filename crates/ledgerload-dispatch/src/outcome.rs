//! Per-item outcomes and batch aggregation

use serde::Serialize;
use tracing::{info, warn};

use ledgerload_core::{LoadEvent, RevisionWriter};

/// What happened to one decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The event passed validation and its mutation committed.
    Applied,
    /// The event was an idempotent no-op.
    Skipped,
    /// The event cannot be applied now; the channel should retry it.
    Failed(String),
}

impl ItemOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ItemOutcome::Failed(_))
    }
}

/// One failed item, reported back to a per-item channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemFailure {
    pub item_id: String,
}

/// Per-item failure report for channels that acknowledge successes
/// individually.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResponse {
    pub failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    pub fn record_failure(&mut self, item_id: impl Into<String>) {
        self.failures.push(BatchItemFailure {
            item_id: item_id.into(),
        });
    }

    /// True when every item was acknowledged.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Route one event through the writer and fold the result (including
/// unexpected ledger errors) into an [`ItemOutcome`].
pub async fn apply_event(
    writer: &RevisionWriter,
    event: &LoadEvent,
    item_id: &str,
) -> ItemOutcome {
    match writer.write_event(event).await {
        Ok(result) if result.is_fail() => {
            let message = result.message().unwrap_or("validation failed").to_string();
            warn!(item_id, message, "event failed");
            ItemOutcome::Failed(message)
        }
        Ok(result) if result.is_skip() => {
            info!(
                item_id,
                message = result.message().unwrap_or(""),
                "event skipped"
            );
            ItemOutcome::Skipped
        }
        Ok(_) => ItemOutcome::Applied,
        Err(err) => {
            warn!(item_id, error = %err, "event raised a ledger error");
            ItemOutcome::Failed(err.to_string())
        }
    }
}
