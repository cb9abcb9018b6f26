//! SurrealDB-backed ledger driver
//!
//! Revision tables hold one row per live document:
//! `{ doc_id, version, txn_time, data }`. A `ledger_catalog` table carries
//! the schema catalog consulted by the active-tables snapshot. Mutations
//! buffer in the transaction and commit as one `BEGIN`/`COMMIT` script;
//! per-mutation version predicates `THROW` on a lost race, which surfaces
//! as `LedgerError::Conflict` for the writer's retry loop.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};

use super::{CommittedRevision, LedgerDriver, LedgerTransaction, RevisionMetadata};

const CATALOG_TABLE: &str = "ledger_catalog";
const STATUS_ACTIVE: &str = "ACTIVE";
const CONFLICT_MARKER: &str = "revision version conflict";

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogRow {
    name: String,
    status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RevisionRow {
    doc_id: String,
    version: i64,
    #[serde(with = "surreal_datetime")]
    txn_time: DateTime<Utc>,
    data: Value,
}

/// SurrealDB-backed implementation of [`LedgerDriver`].
pub struct SurrealLedger {
    db: Surreal<Any>,
}

impl SurrealLedger {
    /// Create an in-memory instance.
    ///
    /// Connects to `mem://`, selects `ledgerload/<name>`, and initializes
    /// the schema catalog.
    pub async fn in_memory(ledger_name: &str) -> LedgerResult<Self> {
        let ledger = Self::connect("mem://", ledger_name).await?;
        info!("SurrealLedger connected (in-memory)");
        Ok(ledger)
    }

    /// Connect to an endpoint and select the ledger's database.
    pub async fn connect(endpoint: &str, ledger_name: &str) -> LedgerResult<Self> {
        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;

        db.use_ns("ledgerload")
            .use_db(ledger_name)
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;

        let ledger = SurrealLedger { db };
        ledger.init_schema().await?;
        info!(endpoint, ledger_name, "SurrealLedger connected");
        Ok(ledger)
    }

    /// Initialize the schema catalog table.
    async fn init_schema(&self) -> LedgerResult<()> {
        debug!("initializing ledger catalog schema");

        let schema = r#"
            -- Schema catalog consulted by the active-tables snapshot
            DEFINE TABLE ledger_catalog SCHEMAFULL;
            DEFINE FIELD name ON ledger_catalog TYPE string;
            DEFINE FIELD status ON ledger_catalog TYPE string;
            DEFINE INDEX idx_catalog_name ON ledger_catalog FIELDS name UNIQUE;
        "#;

        self.db
            .query(schema)
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        Ok(())
    }

    /// Register a revision table and mark it ACTIVE in the catalog.
    pub async fn register_table(&self, name: &str) -> LedgerResult<()> {
        let table = valid_ident(name)?;

        let ddl = format!(
            "DEFINE TABLE {table} SCHEMAFULL;\n\
             DEFINE FIELD doc_id ON {table} TYPE string;\n\
             DEFINE FIELD version ON {table} TYPE int;\n\
             DEFINE FIELD txn_time ON {table} TYPE datetime;\n\
             DEFINE FIELD data ON {table} FLEXIBLE TYPE object;\n\
             DEFINE INDEX idx_{table}_doc ON {table} FIELDS doc_id UNIQUE;"
        );
        self.db
            .query(ddl)
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        let _created: Option<CatalogRow> = self
            .db
            .create(CATALOG_TABLE)
            .content(CatalogRow {
                name: name.to_string(),
                status: STATUS_ACTIVE.to_string(),
            })
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        debug!(table = name, "registered ledger table");
        Ok(())
    }

    /// Update a table's catalog status.
    pub async fn set_table_status(&self, name: &str, status: &str) -> LedgerResult<()> {
        let name_owned = name.to_string();
        let status_owned = status.to_string();
        self.db
            .query("UPDATE ledger_catalog SET status = $status WHERE name = $name")
            .bind(("name", name_owned))
            .bind(("status", status_owned))
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerDriver for SurrealLedger {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(SurrealTransaction {
            db: self.db.clone(),
            mutations: Vec::new(),
        }))
    }

    async fn active_tables(&self) -> LedgerResult<HashSet<String>> {
        let status = STATUS_ACTIVE.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM ledger_catalog WHERE status = $status")
            .bind(("status", status))
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        let rows: Vec<CatalogRow> = res
            .take(0)
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(|row| row.name).collect())
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

struct SurrealTransaction {
    db: Surreal<Any>,
    mutations: Vec<Mutation>,
}

#[async_trait]
impl LedgerTransaction for SurrealTransaction {
    async fn find_by_field(
        &mut self,
        table: &str,
        field: &str,
        value: &Value,
    ) -> LedgerResult<Option<CommittedRevision>> {
        let table = valid_ident(table)?;
        let field = valid_ident(field)?;

        let sql = format!(
            "SELECT doc_id, version, txn_time, data FROM {table} \
             WHERE data.{field} = $value LIMIT 1"
        );
        let value_owned = value.clone();
        let mut res = self
            .db
            .query(sql)
            .bind(("value", value_owned))
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        let rows: Vec<RevisionRow> = res
            .take(0)
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        Ok(rows.into_iter().next().map(|row| CommittedRevision {
            metadata: RevisionMetadata {
                id: row.doc_id,
                version: row.version,
                txn_time: row.txn_time,
            },
            data: Some(row.data),
        }))
    }

    async fn insert(&mut self, table: &str, revision: &Value) -> LedgerResult<()> {
        valid_ident(table)?;
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
        valid_ident(table)?;
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
        valid_ident(table)?;
        self.mutations.push(Mutation::Remove {
            table: table.to_string(),
            doc_id: doc_id.to_string(),
            expected_version,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        if self.mutations.is_empty() {
            return Ok(());
        }

        let mut script = String::from("BEGIN TRANSACTION;\n");
        for (i, mutation) in self.mutations.iter().enumerate() {
            match mutation {
                Mutation::Insert { table, .. } => {
                    let table = valid_ident(table)?;
                    script.push_str(&format!(
                        "CREATE {table} CONTENT {{ doc_id: $doc{i}, version: 0, \
                         txn_time: time::now(), data: $data{i} }};\n"
                    ));
                }
                Mutation::Replace { table, .. } => {
                    let table = valid_ident(table)?;
                    script.push_str(&format!(
                        "IF (SELECT VALUE version FROM {table} WHERE doc_id = $doc{i})[0] != $ver{i} \
                         {{ THROW \"{CONFLICT_MARKER}\" }};\n\
                         UPDATE {table} SET version = $ver{i} + 1, txn_time = time::now(), \
                         data = $data{i} WHERE doc_id = $doc{i};\n"
                    ));
                }
                Mutation::Remove { table, .. } => {
                    let table = valid_ident(table)?;
                    script.push_str(&format!(
                        "IF (SELECT VALUE version FROM {table} WHERE doc_id = $doc{i})[0] != $ver{i} \
                         {{ THROW \"{CONFLICT_MARKER}\" }};\n\
                         DELETE {table} WHERE doc_id = $doc{i};\n"
                    ));
                }
            }
        }
        script.push_str("COMMIT TRANSACTION;");

        let mut query = self.db.query(script);
        for (i, mutation) in self.mutations.into_iter().enumerate() {
            match mutation {
                Mutation::Insert { revision, .. } => {
                    query = query
                        .bind((format!("doc{i}"), uuid::Uuid::new_v4().to_string()))
                        .bind((format!("data{i}"), revision));
                }
                Mutation::Replace {
                    doc_id,
                    expected_version,
                    revision,
                    ..
                } => {
                    query = query
                        .bind((format!("doc{i}"), doc_id))
                        .bind((format!("ver{i}"), expected_version))
                        .bind((format!("data{i}"), revision));
                }
                Mutation::Remove {
                    doc_id,
                    expected_version,
                    ..
                } => {
                    query = query
                        .bind((format!("doc{i}"), doc_id))
                        .bind((format!("ver{i}"), expected_version));
                }
            }
        }

        let res = query.await.map_err(classify)?;
        res.check().map(|_| ()).map_err(classify)
    }

    async fn abort(self: Box<Self>) -> LedgerResult<()> {
        // Nothing reached the ledger; dropping the buffer is the abort.
        Ok(())
    }
}

fn classify(err: surrealdb::Error) -> LedgerError {
    let message = err.to_string();
    if message.contains(CONFLICT_MARKER) {
        LedgerError::Conflict(message)
    } else {
        LedgerError::Backend(message)
    }
}

/// Identifiers are interpolated into SurrealQL, so they are restricted to
/// `[A-Za-z_][A-Za-z0-9_]*`. Table names additionally pass through the
/// active-tables registry before reaching a transaction.
fn valid_ident(name: &str) -> LedgerResult<&str> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(LedgerError::Backend(format!(
            "not a valid ledger identifier: {name:?}"
        )))
    }
}
