//! Ledger driver seam
//!
//! The ledger client is an external collaborator; this module defines the
//! trait boundary the apply core drives. Two implementations live here:
//! `SurrealLedger` (production) and `MemoryLedger` (in-memory, for tests).
//!
//! Contract highlights:
//! - Reads see the committed view only; deleted documents are absent.
//! - Mutations are buffered in the transaction and applied atomically at
//!   commit.
//! - `replace`/`remove` carry the expected committed version; a mismatch at
//!   commit surfaces as `LedgerError::Conflict`, which drives the writer's
//!   bounded retry loop. The transaction body must therefore be re-runnable.

mod memory;
mod surreal;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LedgerResult;

pub use memory::MemoryLedger;
pub use surreal::SurrealLedger;

/// Ledger-assigned metadata of a committed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionMetadata {
    /// Ledger-assigned document identity
    pub id: String,
    /// Monotonic per-document version, starting at 0
    pub version: i64,
    /// Commit time of this revision
    pub txn_time: DateTime<Utc>,
}

/// The committed view of one document at its latest revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedRevision {
    pub metadata: RevisionMetadata,
    /// Absent only when the revision is a tombstone (stream-derived views);
    /// committed-view lookups never return tombstones.
    pub data: Option<Value>,
}

/// A single ledger transaction. Reads observe committed state; mutations
/// buffer until `commit`.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Look up the committed revision of the document whose `field` within
    /// `data` equals `value`. Returns `None` when no live document matches.
    async fn find_by_field(
        &mut self,
        table: &str,
        field: &str,
        value: &Value,
    ) -> LedgerResult<Option<CommittedRevision>>;

    /// Insert a new document; the ledger assigns identity and version 0.
    async fn insert(&mut self, table: &str, revision: &Value) -> LedgerResult<()>;

    /// Replace the document `doc_id`, expecting it to still be at
    /// `expected_version`. Conflicts surface at commit.
    async fn replace(
        &mut self,
        table: &str,
        doc_id: &str,
        expected_version: i64,
        revision: &Value,
    ) -> LedgerResult<()>;

    /// Remove the document `doc_id` from the committed view, expecting it to
    /// still be at `expected_version`.
    async fn remove(&mut self, table: &str, doc_id: &str, expected_version: i64)
        -> LedgerResult<()>;

    /// Apply all buffered mutations atomically.
    async fn commit(self: Box<Self>) -> LedgerResult<()>;

    /// Discard all buffered mutations.
    async fn abort(self: Box<Self>) -> LedgerResult<()>;
}

/// Connection-level ledger operations.
#[async_trait]
pub trait LedgerDriver: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTransaction>>;

    /// Schema-catalog metadata query: the set of tables whose status is
    /// ACTIVE. Captured once per writer lifetime.
    async fn active_tables(&self) -> LedgerResult<HashSet<String>>;
}
