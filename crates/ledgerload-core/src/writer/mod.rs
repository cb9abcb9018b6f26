//! The apply core
//!
//! `RevisionWriter` owns the per-event pipeline: pre-validate, read the
//! current committed revision, validate against it, derive the to-be-written
//! revision, and emit exactly one ledger mutation. The revision-lookup
//! behaviour is pluggable through `RevisionStrategy`; the batch driver,
//! validation state machine, and write planning are implemented once here.
//!
//! The transaction body is idempotent under re-execution: every OCC retry
//! re-reads the current revision and re-plans the mutation, so the bounded
//! conflict-retry loop carries no state between attempts.

mod backlink;
mod field_mapped;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::error::{LedgerError, LoadError};
use crate::event::{LoadEvent, Operation};
use crate::ledger::{CommittedRevision, LedgerDriver, LedgerTransaction};
use crate::registry::ActiveTables;
use crate::validation::ValidationResult;
use crate::Result;

pub use backlink::{BackLinkStrategy, OLD_DOCUMENT_ID_FIELD};
pub use field_mapped::FieldMappedStrategy;

/// Revision-lookup seam of the apply core.
///
/// The default `validate` carries the shared state machine; implementations
/// override the lookup (`read_current`), the strategy-specific
/// pre-validation, and the derivation of the to-be-written revision.
#[async_trait]
pub trait RevisionStrategy: Send + Sync {
    /// Strategy-specific checks before a transaction opens. Structural
    /// validity and the active-tables check happen in the writer.
    fn pre_validate(&self, _event: &LoadEvent) -> ValidationResult {
        ValidationResult::pass()
    }

    /// Look up the committed revision the event applies to.
    async fn read_current(
        &self,
        txn: &mut dyn LedgerTransaction,
        event: &LoadEvent,
    ) -> std::result::Result<Option<CommittedRevision>, LedgerError>;

    /// Decide pass/skip/fail for the event against the committed revision.
    fn validate(
        &self,
        event: &LoadEvent,
        current: Option<&CommittedRevision>,
        strict: bool,
    ) -> ValidationResult {
        let op = match event.operation {
            Some(op) => op,
            None => return ValidationResult::fail("event has no operation"),
        };

        match (op, current) {
            (Operation::Insert, Some(cur)) => ValidationResult::skip(format!(
                "document already exists at version {}",
                cur.metadata.version
            )),
            (Operation::Insert, None) => ValidationResult::pass(),
            (Operation::Update, None) | (Operation::Delete, None) => {
                let message = format!("no current revision to {op}");
                if strict {
                    ValidationResult::fail(message)
                } else {
                    ValidationResult::skip(message)
                }
            }
            (Operation::Any, None) => {
                if event.revision.is_none() {
                    ValidationResult::skip("no current revision and no new revision")
                } else {
                    ValidationResult::pass()
                }
            }
            (Operation::Update, Some(cur)) | (Operation::Delete, Some(cur)) => {
                let cur_v = cur.metadata.version;
                match event.version {
                    Some(ev_v) if ev_v <= cur_v => stale(ev_v, cur_v),
                    Some(ev_v) if ev_v > cur_v + 1 => gapped(ev_v, cur_v),
                    // Unknown version defers to the channel's ordering
                    _ => ValidationResult::pass(),
                }
            }
            (Operation::Any, Some(cur)) => {
                let cur_v = cur.metadata.version;
                match event.version {
                    // Without an asserted version there is nothing newer here
                    None => ValidationResult::skip(format!(
                        "document already exists at version {cur_v}"
                    )),
                    Some(ev_v) if ev_v <= cur_v => stale(ev_v, cur_v),
                    Some(ev_v) if ev_v > cur_v + 1 => gapped(ev_v, cur_v),
                    _ => ValidationResult::pass(),
                }
            }
        }
    }

    /// Derive the revision to write. Events are immutable; any stamping
    /// (e.g. the back-link) happens on this derived value.
    fn adjust_revision(&self, event: &LoadEvent) -> Option<Value> {
        event.revision.clone()
    }
}

fn stale(ev_v: i64, cur_v: i64) -> ValidationResult {
    ValidationResult::skip(format!(
        "stale revision: event version {ev_v} is at or behind committed version {cur_v}"
    ))
}

fn gapped(ev_v: i64, cur_v: i64) -> ValidationResult {
    ValidationResult::fail(format!(
        "out-of-order revision: event version {ev_v} skips past committed version {cur_v}"
    ))
}

/// The apply core: validates events against committed state and plans
/// ledger mutations, one per applied event.
pub struct RevisionWriter {
    driver: Arc<dyn LedgerDriver>,
    strategy: Arc<dyn RevisionStrategy>,
    active_tables: ActiveTables,
    strict: bool,
    max_occ_retries: u32,
    /// Bounds concurrent ledger transactions per writer instance.
    sessions: Semaphore,
}

impl RevisionWriter {
    /// Construct a writer, capturing the active-tables snapshot for its
    /// lifetime. One ledger session is allowed at a time; see
    /// [`RevisionWriter::from_config`] to raise that.
    pub async fn new(
        driver: Arc<dyn LedgerDriver>,
        strategy: Arc<dyn RevisionStrategy>,
        strict: bool,
        max_occ_retries: u32,
    ) -> Result<Self> {
        Self::with_sessions(driver, strategy, strict, max_occ_retries, 1).await
    }

    /// Construct a writer from the process configuration, using its
    /// strategy selection, strict-mode policy, and session/retry limits.
    pub async fn from_config(driver: Arc<dyn LedgerDriver>, config: &LoaderConfig) -> Result<Self> {
        Self::with_sessions(
            driver,
            config.build_strategy(),
            config.strict_mode,
            config.max_occ_retries,
            config.max_sessions,
        )
        .await
    }

    async fn with_sessions(
        driver: Arc<dyn LedgerDriver>,
        strategy: Arc<dyn RevisionStrategy>,
        strict: bool,
        max_occ_retries: u32,
        max_sessions: u32,
    ) -> Result<Self> {
        let active_tables = ActiveTables::snapshot(driver.as_ref()).await?;
        Ok(RevisionWriter {
            driver,
            strategy,
            active_tables,
            strict,
            max_occ_retries,
            sessions: Semaphore::new(max_sessions.max(1) as usize),
        })
    }

    /// Apply one event under its own ledger transaction.
    pub async fn write_event(&self, event: &LoadEvent) -> Result<ValidationResult> {
        let pre = self.pre_validate(event);
        if !pre.is_pass() {
            self.log_result(event, &pre);
            return Ok(pre);
        }

        let _session = self.acquire_session().await?;
        let mut attempt: u32 = 0;
        loop {
            let mut txn = self.driver.begin().await?;
            let result = self.apply_in(txn.as_mut(), event).await?;
            if !result.is_pass() {
                txn.abort().await?;
                self.log_result(event, &result);
                return Ok(result);
            }
            match txn.commit().await {
                Ok(()) => {
                    debug!(table = %event.table, op = %display_op(event), "event applied");
                    return Ok(result);
                }
                Err(LedgerError::Conflict(reason)) if attempt < self.max_occ_retries => {
                    attempt += 1;
                    warn!(
                        table = %event.table,
                        attempt,
                        reason,
                        "commit conflict, retrying transaction"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Apply a batch atomically: all-or-nothing in a single transaction.
    /// Poorly-formed events are dropped with a warning before the
    /// transaction opens; any skip or fail aborts the whole batch.
    pub async fn write_events(&self, events: &[LoadEvent]) -> Result<()> {
        let mut accepted: Vec<(usize, &LoadEvent)> = Vec::with_capacity(events.len());
        for (index, event) in events.iter().enumerate() {
            if event.is_valid() {
                accepted.push((index, event));
            } else {
                warn!(index, "dropping poorly-formed event from batch");
            }
        }

        let _session = self.acquire_session().await?;
        let mut attempt: u32 = 0;
        loop {
            let mut txn = self.driver.begin().await?;
            for (index, event) in &accepted {
                let pre = self.pre_validate(event);
                let result = if pre.is_pass() {
                    self.apply_in(txn.as_mut(), event).await?
                } else {
                    pre
                };
                if !result.is_pass() {
                    txn.abort().await?;
                    return Err(LoadError::BatchRejected {
                        index: *index,
                        message: result
                            .message()
                            .unwrap_or("event did not pass validation")
                            .to_string(),
                    });
                }
            }
            match txn.commit().await {
                Ok(()) => {
                    debug!(events = accepted.len(), "batch applied");
                    return Ok(());
                }
                Err(LedgerError::Conflict(reason)) if attempt < self.max_occ_retries => {
                    attempt += 1;
                    warn!(attempt, reason, "batch commit conflict, retrying transaction");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn acquire_session(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        // The semaphore is never closed
        self.sessions
            .acquire()
            .await
            .map_err(|e| LoadError::Ledger(LedgerError::Backend(e.to_string())))
    }

    /// Structural and registry checks, then the strategy's own.
    fn pre_validate(&self, event: &LoadEvent) -> ValidationResult {
        if !event.is_valid() {
            return ValidationResult::fail("event is missing required fields");
        }
        if !self.active_tables.contains(&event.table) {
            return ValidationResult::skip(format!(
                "table {} is not active in the target ledger",
                event.table
            ));
        }
        self.strategy.pre_validate(event)
    }

    /// The in-transaction pipeline: read current, validate, plan the write.
    async fn apply_in(
        &self,
        txn: &mut dyn LedgerTransaction,
        event: &LoadEvent,
    ) -> Result<ValidationResult> {
        let current = self.strategy.read_current(txn, event).await?;
        let result = self
            .strategy
            .validate(event, current.as_ref(), self.strict);
        if result.is_pass() {
            let revision = self.strategy.adjust_revision(event);
            self.write_document(txn, event, current.as_ref(), revision)
                .await?;
        }
        Ok(result)
    }

    /// Emit exactly one ledger mutation for the event's effective operation.
    async fn write_document(
        &self,
        txn: &mut dyn LedgerTransaction,
        event: &LoadEvent,
        current: Option<&CommittedRevision>,
        revision: Option<Value>,
    ) -> Result<()> {
        let table = event.table.as_str();
        let op = event
            .operation
            .ok_or_else(|| LoadError::InvalidEvent("event has no operation".to_string()))?;

        match (op, current, revision) {
            (Operation::Insert, _, Some(rev)) | (Operation::Any, None, Some(rev)) => {
                txn.insert(table, &rev).await?;
            }
            (Operation::Update, Some(cur), Some(rev)) | (Operation::Any, Some(cur), Some(rev)) => {
                txn.replace(table, &cur.metadata.id, cur.metadata.version, &rev)
                    .await?;
            }
            (Operation::Delete, Some(cur), _) | (Operation::Any, Some(cur), None) => {
                txn.remove(table, &cur.metadata.id, cur.metadata.version)
                    .await?;
            }
            (op, _, _) => {
                // Validation admits no other combination
                return Err(LoadError::InvalidEvent(format!(
                    "no mutation can be planned for {op} in the current state"
                )));
            }
        }
        Ok(())
    }

    fn log_result(&self, event: &LoadEvent, result: &ValidationResult) {
        if result.is_skip() {
            info!(
                table = %event.table,
                op = %display_op(event),
                message = result.message().unwrap_or(""),
                "event skipped"
            );
        } else if result.is_fail() {
            warn!(
                table = %event.table,
                op = %display_op(event),
                message = result.message().unwrap_or(""),
                "event failed validation"
            );
        }
    }
}

fn display_op(event: &LoadEvent) -> &'static str {
    event.operation.map(|op| op.as_str()).unwrap_or("UNSET")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RevisionMetadata;
    use chrono::Utc;
    use serde_json::json;

    fn committed(version: i64) -> CommittedRevision {
        CommittedRevision {
            metadata: RevisionMetadata {
                id: "doc-1".to_string(),
                version,
                txn_time: Utc::now(),
            },
            data: Some(json!({"n": "A"})),
        }
    }

    fn strategy() -> BackLinkStrategy {
        BackLinkStrategy::new()
    }

    #[test]
    fn insert_skips_when_document_exists() {
        let event = LoadEvent::new(Operation::Insert, "T").with_revision(json!({}));
        let result = strategy().validate(&event, Some(&committed(4)), true);
        assert!(result.is_skip());
    }

    #[test]
    fn insert_ignores_event_version() {
        let event = LoadEvent::new(Operation::Insert, "T")
            .with_version(9)
            .with_revision(json!({}));
        assert!(strategy().validate(&event, None, true).is_pass());
    }

    #[test]
    fn missing_predecessor_fails_strict_skips_relaxed() {
        for op in [Operation::Update, Operation::Delete] {
            let event = LoadEvent::new(op, "T").with_revision(json!({}));

            let strict = strategy().validate(&event, None, true);
            assert!(strict.is_fail(), "{op} should fail in strict mode");
            assert!(strict.message().is_some());

            let relaxed = strategy().validate(&event, None, false);
            assert!(relaxed.is_skip(), "{op} should skip in relaxed mode");
            assert!(relaxed.message().is_some());
        }
    }

    #[test]
    fn stale_and_duplicate_versions_skip() {
        let event = LoadEvent::new(Operation::Update, "T")
            .with_version(3)
            .with_revision(json!({}));
        assert!(strategy().validate(&event, Some(&committed(3)), true).is_skip());
        assert!(strategy().validate(&event, Some(&committed(7)), true).is_skip());
    }

    #[test]
    fn version_gap_fails() {
        let event = LoadEvent::new(Operation::Update, "T")
            .with_version(5)
            .with_revision(json!({}));
        let result = strategy().validate(&event, Some(&committed(3)), true);
        assert!(result.is_fail());
        assert!(result.message().unwrap().contains("out-of-order"));
    }

    #[test]
    fn next_version_and_unknown_version_pass() {
        let next = LoadEvent::new(Operation::Update, "T")
            .with_version(4)
            .with_revision(json!({}));
        assert!(strategy().validate(&next, Some(&committed(3)), true).is_pass());

        let unknown = LoadEvent::new(Operation::Update, "T").with_revision(json!({}));
        assert!(strategy()
            .validate(&unknown, Some(&committed(3)), true)
            .is_pass());
    }

    #[test]
    fn delete_follows_the_same_version_rules() {
        let stale = LoadEvent::new(Operation::Delete, "T").with_version(1);
        assert!(strategy().validate(&stale, Some(&committed(1)), true).is_skip());

        let gapped = LoadEvent::new(Operation::Delete, "T").with_version(9);
        assert!(strategy().validate(&gapped, Some(&committed(1)), true).is_fail());

        let fine = LoadEvent::new(Operation::Delete, "T");
        assert!(strategy().validate(&fine, Some(&committed(1)), true).is_pass());
    }

    #[test]
    fn any_with_nothing_to_write_is_a_noop() {
        let event = LoadEvent::new(Operation::Any, "T");
        let result = strategy().validate(&event, None, true);
        assert!(result.is_skip());
    }

    #[test]
    fn any_against_current_uses_version_rules() {
        let stale = LoadEvent::new(Operation::Any, "T")
            .with_version(0)
            .with_revision(json!({}));
        assert!(strategy().validate(&stale, Some(&committed(0)), true).is_skip());

        let next = LoadEvent::new(Operation::Any, "T")
            .with_version(1)
            .with_revision(json!({}));
        assert!(strategy().validate(&next, Some(&committed(0)), true).is_pass());

        let gapped = LoadEvent::new(Operation::Any, "T")
            .with_version(4)
            .with_revision(json!({}));
        assert!(strategy().validate(&gapped, Some(&committed(0)), true).is_fail());
    }

    #[test]
    fn any_without_version_skips_when_current_exists() {
        let resend = LoadEvent::new(Operation::Any, "T").with_revision(json!({}));
        let result = strategy().validate(&resend, Some(&committed(0)), true);
        assert!(result.is_skip());
        assert!(result.message().unwrap().contains("already exists"));
    }
}
