//! Mapping of foreign schema events onto ledger tables
//!
//! A change-data-capture record arrives with a source-table name and
//! columnar fields. The mapper translates that into the target table, the
//! target identity value, and the target record, consulting a static
//! mapping definition loaded once at startup.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::document::JsonMap;
use crate::error::ConfigError;

/// One source-field to target-field rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(rename = "source-field")]
    pub source_field: String,
    #[serde(rename = "target-field")]
    pub target_field: String,
}

/// Mapping of one source table onto one target table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapping {
    #[serde(rename = "source-table")]
    pub source_table: String,
    #[serde(rename = "target-table")]
    pub target_table: String,
    /// Source field carrying the record's identity.
    #[serde(rename = "id-field")]
    pub id_field: String,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

/// Translator from a foreign schema event to a canonical event's parts.
///
/// A `None` from any method means the record has no mapping and the caller
/// skips it.
pub trait LoadEventMapper: Send + Sync {
    /// Target table for a source table, if mapped.
    fn map_table_name(&self, source_table: &str) -> Option<String>;

    /// Identity value for a source record. When a before image is supplied
    /// and the identity field appears there (the key-change case), the
    /// before image takes precedence.
    fn map_primary_key(
        &self,
        source_table: &str,
        record: &JsonMap,
        before_image: Option<&JsonMap>,
    ) -> Option<Value>;

    /// Project a source record into the target schema. Only fields present
    /// in the field map are emitted; unmapped source fields are dropped.
    fn map_data_record(&self, source_table: &str, record: &JsonMap) -> Option<JsonMap>;
}

#[derive(Debug, Clone)]
struct CompiledMapping {
    target_table: String,
    id_field: String,
    fields: HashMap<String, String>,
}

/// File-driven [`LoadEventMapper`], reading the mapping definition from a
/// JSON document: a top-level list of table mappings.
#[derive(Debug, Clone)]
pub struct FileTableMapper {
    mappings: HashMap<String, CompiledMapping>,
}

impl FileTableMapper {
    /// Load the mapping definition from a file. Missing or malformed files
    /// are fatal initialization errors.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::MappingFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mapper = Self::from_str(&text)?;
        debug!(
            path = %path.display(),
            tables = mapper.mappings.len(),
            "loaded table mapping definition"
        );
        Ok(mapper)
    }

    /// Parse the mapping definition from its textual form.
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let raw: Vec<TableMapping> =
            serde_json::from_str(text).map_err(|e| ConfigError::MappingParse(e.to_string()))?;
        Self::from_mappings(raw)
    }

    /// Build from already-parsed mappings, validating completeness and
    /// source-table uniqueness.
    pub fn from_mappings(raw: Vec<TableMapping>) -> Result<Self, ConfigError> {
        let mut mappings = HashMap::with_capacity(raw.len());
        for mapping in raw {
            if mapping.source_table.is_empty()
                || mapping.target_table.is_empty()
                || mapping.id_field.is_empty()
            {
                return Err(ConfigError::MappingParse(format!(
                    "incomplete mapping for source table {:?}",
                    mapping.source_table
                )));
            }
            let fields = mapping
                .fields
                .into_iter()
                .map(|f| (f.source_field, f.target_field))
                .collect();
            let previous = mappings.insert(
                mapping.source_table.clone(),
                CompiledMapping {
                    target_table: mapping.target_table,
                    id_field: mapping.id_field,
                    fields,
                },
            );
            if previous.is_some() {
                return Err(ConfigError::MappingParse(format!(
                    "duplicate mapping for source table {:?}",
                    mapping.source_table
                )));
            }
        }
        Ok(FileTableMapper { mappings })
    }
}

impl LoadEventMapper for FileTableMapper {
    fn map_table_name(&self, source_table: &str) -> Option<String> {
        self.mappings
            .get(source_table)
            .map(|m| m.target_table.clone())
    }

    fn map_primary_key(
        &self,
        source_table: &str,
        record: &JsonMap,
        before_image: Option<&JsonMap>,
    ) -> Option<Value> {
        let mapping = self.mappings.get(source_table)?;
        if let Some(image) = before_image {
            if let Some(value) = image.get(&mapping.id_field).filter(|v| !v.is_null()) {
                return Some(value.clone());
            }
        }
        record
            .get(&mapping.id_field)
            .filter(|v| !v.is_null())
            .cloned()
    }

    fn map_data_record(&self, source_table: &str, record: &JsonMap) -> Option<JsonMap> {
        let mapping = self.mappings.get(source_table)?;
        let mut target = JsonMap::new();
        for (field, value) in record {
            if let Some(target_field) = mapping.fields.get(field) {
                target.insert(target_field.clone(), value.clone());
            }
        }
        Some(target)
    }
}
