//! Active-tables registry
//!
//! A snapshot of the tables marked ACTIVE in the ledger's schema catalog,
//! taken once per writer lifetime and never refreshed. Pre-validation skips
//! events targeting tables outside the snapshot.

use std::collections::HashSet;

use tracing::debug;

use crate::error::LedgerResult;
use crate::ledger::LedgerDriver;

/// Read-only snapshot of the ledger's ACTIVE tables.
#[derive(Debug, Clone)]
pub struct ActiveTables {
    tables: HashSet<String>,
}

impl ActiveTables {
    /// Capture the snapshot from the ledger's schema catalog.
    pub async fn snapshot(driver: &dyn LedgerDriver) -> LedgerResult<Self> {
        let tables = driver.active_tables().await?;
        debug!(count = tables.len(), "captured active-tables snapshot");
        Ok(ActiveTables { tables })
    }

    /// Build a snapshot from known names (test and embedding convenience).
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ActiveTables {
            tables: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    #[tokio::test]
    async fn snapshot_is_not_refreshed() {
        let ledger = MemoryLedger::with_tables(&["Person"]);
        let snapshot = ActiveTables::snapshot(&ledger).await.unwrap();
        assert!(snapshot.contains("Person"));

        // Catalog changes after the snapshot are not observed
        ledger.create_table("Vehicle");
        assert!(!snapshot.contains("Vehicle"));
    }
}
