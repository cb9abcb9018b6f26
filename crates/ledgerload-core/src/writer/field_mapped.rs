//! Identity-field revision strategy (alternate)
//!
//! Instead of a back-link, a configured per-table field carries the
//! document's identity. The written revision passes through unchanged; the
//! lookup queries the configured field, with `*` as a wildcard fallback for
//! tables without their own entry.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::LedgerError;
use crate::event::LoadEvent;
use crate::ledger::{CommittedRevision, LedgerTransaction};
use crate::validation::ValidationResult;

use super::RevisionStrategy;

/// Wildcard key matching any table without an explicit mapping.
pub const WILDCARD_TABLE: &str = "*";

/// [`RevisionStrategy`] looking documents up by a configured identity field.
#[derive(Debug, Clone)]
pub struct FieldMappedStrategy {
    fields: HashMap<String, String>,
}

impl FieldMappedStrategy {
    /// Build from a `table -> field` map; a `*` entry acts as the fallback.
    pub fn new(fields: HashMap<String, String>) -> Self {
        FieldMappedStrategy { fields }
    }

    fn field_for(&self, table: &str) -> Option<&str> {
        self.fields
            .get(table)
            .or_else(|| self.fields.get(WILDCARD_TABLE))
            .map(String::as_str)
    }
}

#[async_trait]
impl RevisionStrategy for FieldMappedStrategy {
    fn pre_validate(&self, event: &LoadEvent) -> ValidationResult {
        if self.field_for(&event.table).is_none() {
            return ValidationResult::skip(format!(
                "no identity field configured for table {}",
                event.table
            ));
        }
        ValidationResult::pass()
    }

    async fn read_current(
        &self,
        txn: &mut dyn LedgerTransaction,
        event: &LoadEvent,
    ) -> Result<Option<CommittedRevision>, LedgerError> {
        let id = match &event.id {
            Some(id) => id,
            None => return Ok(None),
        };
        let field = match self.field_for(&event.table) {
            Some(field) => field,
            None => {
                debug!(table = %event.table, "no identity field mapping, nothing to read");
                return Ok(None);
            }
        };
        txn.find_by_field(&event.table, field, id).await
    }

    // adjust_revision: the default pass-through; nothing is stamped.
}
