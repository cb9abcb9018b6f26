//! Canonical load event model
//!
//! A load event is a single intent to mutate one document: insert, update or
//! delete, with an optional source-side identity and version. Events decode
//! from heterogeneous channel framings into this one shape; everything past
//! the dispatcher speaks `LoadEvent`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::document::{self, JsonMap};

/// Wire field carrying the operation.
pub const FIELD_OPERATION: &str = "op";
/// Wire field carrying the target table name.
pub const FIELD_TABLE: &str = "table";
/// Wire field carrying the source-side identity.
pub const FIELD_ID: &str = "id";
/// Wire field carrying the expected document version.
pub const FIELD_VERSION: &str = "version";
/// Wire field carrying the FIFO shard key.
pub const FIELD_GROUP: &str = "group";
/// Wire field carrying the new revision.
pub const FIELD_DATA: &str = "data";

/// The intended mutation. `Any` defers the choice to the writer based on
/// current committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Any,
}

impl Operation {
    /// Parse the case-sensitive textual form. Unrecognized text is `None`.
    pub fn parse(s: &str) -> Option<Operation> {
        match s {
            "INSERT" => Some(Operation::Insert),
            "UPDATE" => Some(Operation::Update),
            "DELETE" => Some(Operation::Delete),
            "ANY" => Some(Operation::Any),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Any => "ANY",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One intent to mutate one document in one table.
///
/// Events are value types: the writer never mutates them, deriving any
/// to-be-written revision separately.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadEvent {
    /// Unset on a partially-decoded event; such events are invalid.
    pub operation: Option<Operation>,
    /// Target table name, trimmed. Empty means absent.
    pub table: String,
    /// Opaque source-side identity (idempotency key). Scalar only.
    pub id: Option<Value>,
    /// Expected document version. Absent means unknown; negative wire
    /// values (the -1 sentinel) normalize to absent.
    pub version: Option<i64>,
    /// The new revision to write. A DELETE may omit it.
    pub revision: Option<Value>,
    /// FIFO shard key, used only by FIFO delivery channels.
    pub grouping_value: Option<String>,
}

impl LoadEvent {
    /// Create an event with the required fields set.
    pub fn new(operation: Operation, table: impl Into<String>) -> Self {
        LoadEvent {
            operation: Some(operation),
            table: table.into().trim().to_string(),
            ..LoadEvent::default()
        }
    }

    pub fn with_id(mut self, id: Value) -> Self {
        self.id = document::scalar_or_absent(&id);
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = if version >= 0 { Some(version) } else { None };
        self
    }

    pub fn with_revision(mut self, revision: Value) -> Self {
        self.revision = if revision.is_null() {
            None
        } else {
            Some(revision)
        };
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        self.grouping_value = if group.is_empty() { None } else { Some(group) };
        self
    }

    /// Decode from a textual payload. A null or empty payload yields no
    /// event, as does a non-object document (callers log and skip those).
    pub fn from_payload(text: &str) -> serde_json::Result<Option<LoadEvent>> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(trimmed)?;
        Ok(Self::from_value(&value))
    }

    /// Decode from an already-parsed document. Unknown fields are ignored.
    /// Returns `None` for non-object documents; a decoded event may still
    /// be invalid (see [`LoadEvent::is_valid`]).
    pub fn from_value(value: &Value) -> Option<LoadEvent> {
        let obj = value.as_object()?;

        let operation = obj
            .get(FIELD_OPERATION)
            .and_then(Value::as_str)
            .and_then(Operation::parse);
        let table = obj
            .get(FIELD_TABLE)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let id = obj.get(FIELD_ID).and_then(document::scalar_or_absent);
        let version = obj
            .get(FIELD_VERSION)
            .and_then(Value::as_i64)
            .filter(|v| *v >= 0);
        let grouping_value = obj
            .get(FIELD_GROUP)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let revision = obj.get(FIELD_DATA).filter(|v| !v.is_null()).cloned();

        Some(LoadEvent {
            operation,
            table,
            id,
            version,
            revision,
            grouping_value,
        })
    }

    /// Derive an event from a committed revision document, for re-emitting
    /// captured history. Requires `metadata.id` and `metadata.version`.
    /// Absent `data` means the revision is a tombstone and derives a DELETE;
    /// version 0 derives an INSERT; anything else an UPDATE.
    pub fn from_committed_revision(table: &str, revision: &Value) -> Option<LoadEvent> {
        let table = document::trimmed_or_absent(table)?;
        let metadata = revision.get("metadata")?.as_object()?;
        let id = metadata.get("id").and_then(document::scalar_or_absent)?;
        let version = metadata
            .get("version")
            .and_then(Value::as_i64)
            .filter(|v| *v >= 0)?;
        let data = revision.get("data").filter(|v| !v.is_null()).cloned();

        let operation = if data.is_none() {
            Operation::Delete
        } else if version == 0 {
            Operation::Insert
        } else {
            Operation::Update
        };

        Some(LoadEvent {
            operation: Some(operation),
            table: table.to_string(),
            id: Some(id),
            version: Some(version),
            revision: data,
            grouping_value: None,
        })
    }

    /// An event is valid when operation and table are set, and a revision is
    /// present for INSERT/UPDATE. A DELETE may omit the revision.
    pub fn is_valid(&self) -> bool {
        let op = match self.operation {
            Some(op) => op,
            None => return false,
        };
        if self.table.is_empty() {
            return false;
        }
        match op {
            Operation::Insert | Operation::Update => self.revision.is_some(),
            Operation::Delete | Operation::Any => true,
        }
    }

    /// Encode to the wire payload, emitting exactly the fields that are set.
    pub fn to_payload(&self) -> Value {
        let mut obj = JsonMap::new();
        if let Some(op) = self.operation {
            obj.insert(FIELD_OPERATION.to_string(), Value::from(op.as_str()));
        }
        if !self.table.is_empty() {
            obj.insert(FIELD_TABLE.to_string(), Value::from(self.table.clone()));
        }
        if let Some(id) = &self.id {
            // Cloned to avoid aliasing the event's own value
            obj.insert(FIELD_ID.to_string(), id.clone());
        }
        if let Some(version) = self.version {
            obj.insert(FIELD_VERSION.to_string(), Value::from(version));
        }
        if let Some(group) = &self.grouping_value {
            obj.insert(FIELD_GROUP.to_string(), Value::from(group.clone()));
        }
        if let Some(data) = &self.revision {
            obj.insert(FIELD_DATA.to_string(), data.clone());
        }
        Value::Object(obj)
    }

    /// Canonical textual form of the encoded payload.
    pub fn payload_text(&self) -> String {
        document::canonical_text(&self.to_payload())
    }

    /// Deduplication fingerprint: base64-encoded SHA-256 of the canonical
    /// serialization. Stable across field order and whitespace, used as the
    /// deduplication key by FIFO channels.
    pub fn deduplication_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(document::canonical_bytes(&self.to_payload()));
        BASE64.encode(hasher.finalize())
    }
}
