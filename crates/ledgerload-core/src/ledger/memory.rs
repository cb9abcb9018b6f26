//! In-memory ledger driver (testing only)
//!
//! Satisfies the `LedgerDriver`/`LedgerTransaction` contracts without any
//! external dependencies. Version checks at commit give the same conflict
//! behaviour as a real optimistic ledger, and `inject_conflicts` lets tests
//! exercise the writer's retry loop deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

use super::{CommittedRevision, LedgerDriver, LedgerTransaction, RevisionMetadata};

#[derive(Debug, Clone)]
struct StoredDocument {
    version: i64,
    txn_time: chrono::DateTime<Utc>,
    data: Value,
}

#[derive(Debug, Default)]
struct TableState {
    active: bool,
    docs: HashMap<String, StoredDocument>,
}

type Tables = Arc<Mutex<HashMap<String, TableState>>>;

/// In-memory ledger backed by a `Mutex<HashMap>` of tables.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: Tables,
    injected_conflicts: Arc<AtomicU32>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger with the given tables already ACTIVE.
    pub fn with_tables(names: &[&str]) -> Self {
        let ledger = Self::new();
        for name in names {
            ledger.create_table(name);
        }
        ledger
    }

    /// Register a table as ACTIVE.
    pub fn create_table(&self, name: &str) {
        let mut tables = self.tables.lock().unwrap();
        tables.entry(name.to_string()).or_default().active = true;
    }

    /// Flip a table's catalog status.
    pub fn set_table_active(&self, name: &str, active: bool) {
        let mut tables = self.tables.lock().unwrap();
        tables.entry(name.to_string()).or_default().active = active;
    }

    /// Make the next `n` commits fail with a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Test helper: committed revision of the document whose `field` in
    /// `data` equals `value`.
    pub fn committed(&self, table: &str, field: &str, value: &Value) -> Option<CommittedRevision> {
        let tables = self.tables.lock().unwrap();
        find_in(&tables, table, field, value)
    }

    /// Test helper: number of live documents in a table.
    pub fn document_count(&self, table: &str) -> usize {
        let tables = self.tables.lock().unwrap();
        tables.get(table).map(|t| t.docs.len()).unwrap_or(0)
    }
}

fn find_in(
    tables: &HashMap<String, TableState>,
    table: &str,
    field: &str,
    value: &Value,
) -> Option<CommittedRevision> {
    let state = tables.get(table)?;
    state.docs.iter().find_map(|(doc_id, doc)| {
        if doc.data.get(field) == Some(value) {
            Some(CommittedRevision {
                metadata: RevisionMetadata {
                    id: doc_id.clone(),
                    version: doc.version,
                    txn_time: doc.txn_time,
                },
                data: Some(doc.data.clone()),
            })
        } else {
            None
        }
    })
}

#[async_trait]
impl LedgerDriver for MemoryLedger {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            injected_conflicts: Arc::clone(&self.injected_conflicts),
            mutations: Vec::new(),
        }))
    }

    async fn active_tables(&self) -> LedgerResult<HashSet<String>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .iter()
            .filter(|(_, state)| state.active)
            .map(|(name, _)| name.clone())
            .collect())
    }
}

#[derive(Debug)]
enum Mutation {
    Insert {
        table: String,
        revision: Value,
    },
    Replace {
        table: String,
        doc_id: String,
        expected_version: i64,
        revision: Value,
    },
    Remove {
        table: String,
        doc_id: String,
        expected_version: i64,
    },
}

struct MemoryTransaction {
    tables: Tables,
    injected_conflicts: Arc<AtomicU32>,
    mutations: Vec<Mutation>,
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn find_by_field(
        &mut self,
        table: &str,
        field: &str,
        value: &Value,
    ) -> LedgerResult<Option<CommittedRevision>> {
        let tables = self.tables.lock().unwrap();
        if !tables.contains_key(table) {
            return Err(LedgerError::UnknownTable(table.to_string()));
        }
        Ok(find_in(&tables, table, field, value))
    }

    async fn insert(&mut self, table: &str, revision: &Value) -> LedgerResult<()> {
        self.mutations.push(Mutation::Insert {
            table: table.to_string(),
            revision: revision.clone(),
        });
        Ok(())
    }

    async fn replace(
        &mut self,
        table: &str,
        doc_id: &str,
        expected_version: i64,
        revision: &Value,
    ) -> LedgerResult<()> {
        self.mutations.push(Mutation::Replace {
            table: table.to_string(),
            doc_id: doc_id.to_string(),
            expected_version,
            revision: revision.clone(),
        });
        Ok(())
    }

    async fn remove(
        &mut self,
        table: &str,
        doc_id: &str,
        expected_version: i64,
    ) -> LedgerResult<()> {
        self.mutations.push(Mutation::Remove {
            table: table.to_string(),
            doc_id: doc_id.to_string(),
            expected_version,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let injected = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(LedgerError::Conflict("injected conflict".to_string()));
        }

        let mut tables = self.tables.lock().unwrap();
        for mutation in &self.mutations {
            match mutation {
                Mutation::Insert { table, revision } => {
                    let state = tables
                        .get_mut(table)
                        .ok_or_else(|| LedgerError::UnknownTable(table.clone()))?;
                    state.docs.insert(
                        Uuid::new_v4().to_string(),
                        StoredDocument {
                            version: 0,
                            txn_time: Utc::now(),
                            data: revision.clone(),
                        },
                    );
                }
                Mutation::Replace {
                    table,
                    doc_id,
                    expected_version,
                    revision,
                } => {
                    let state = tables
                        .get_mut(table)
                        .ok_or_else(|| LedgerError::UnknownTable(table.clone()))?;
                    let doc = state.docs.get_mut(doc_id).ok_or_else(|| {
                        LedgerError::Conflict(format!("document {doc_id} no longer exists"))
                    })?;
                    if doc.version != *expected_version {
                        return Err(LedgerError::Conflict(format!(
                            "document {doc_id} moved from version {expected_version} to {}",
                            doc.version
                        )));
                    }
                    doc.version += 1;
                    doc.txn_time = Utc::now();
                    doc.data = revision.clone();
                }
                Mutation::Remove {
                    table,
                    doc_id,
                    expected_version,
                } => {
                    let state = tables
                        .get_mut(table)
                        .ok_or_else(|| LedgerError::UnknownTable(table.clone()))?;
                    let doc = state.docs.get(doc_id).ok_or_else(|| {
                        LedgerError::Conflict(format!("document {doc_id} no longer exists"))
                    })?;
                    if doc.version != *expected_version {
                        return Err(LedgerError::Conflict(format!(
                            "document {doc_id} moved from version {expected_version} to {}",
                            doc.version
                        )));
                    }
                    state.docs.remove(doc_id);
                }
            }
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> LedgerResult<()> {
        Ok(())
    }
}
