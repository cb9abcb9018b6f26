//! Partitioned-log adaptor for change-data-capture records
//!
//! Records carry a `metadata` block (`operation`, `table-name`,
//! `record-type`) and a columnar `data` block, optionally with a prior
//! primary-key image. Each record runs through the table/field mapper;
//! source tables without a mapping are skipped. Failures raise on first
//! occurrence, per the channel's per-item contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use ledgerload_core::config::DEFAULT_BEFORE_IMAGE_FIELD;
use ledgerload_core::{LoadEvent, LoadEventMapper, LoaderConfig, Operation, RevisionWriter};

use crate::channel::ChannelDispatcher;
use crate::error::{DispatchError, DispatchResult};
use crate::outcome::{apply_event, ItemOutcome};
use crate::payload;
use crate::stream::StreamRecord;

const METADATA_FIELD: &str = "metadata";
const DATA_FIELD: &str = "data";
const RECORD_TYPE_FIELD: &str = "record-type";
const RECORD_TYPE_DATA: &str = "data";
const OPERATION_FIELD: &str = "operation";
const TABLE_NAME_FIELD: &str = "table-name";

/// CDC adaptor: translate each record through the mapper and raise on the
/// first failed item.
pub struct CdcDispatcher {
    writer: Arc<RevisionWriter>,
    mapper: Arc<dyn LoadEventMapper>,
    before_image_field: String,
}

impl CdcDispatcher {
    pub fn new(writer: Arc<RevisionWriter>, mapper: Arc<dyn LoadEventMapper>) -> Self {
        CdcDispatcher {
            writer,
            mapper,
            before_image_field: DEFAULT_BEFORE_IMAGE_FIELD.to_string(),
        }
    }

    /// Construct from the process configuration, using its before-image
    /// field name.
    pub fn from_config(
        writer: Arc<RevisionWriter>,
        mapper: Arc<dyn LoadEventMapper>,
        config: &LoaderConfig,
    ) -> Self {
        Self::new(writer, mapper).with_before_image_field(config.before_image_field.as_str())
    }

    /// Override the field holding the prior primary-key image.
    pub fn with_before_image_field(mut self, field: impl Into<String>) -> Self {
        self.before_image_field = field.into();
        self
    }

    /// Translate one CDC record. `Ok(None)` means skip (control record,
    /// unmapped table, foreign operation); `Err` is a malformed record.
    fn translate(&self, item_id: &str, record: &Value) -> Result<Option<LoadEvent>, String> {
        let obj = match record.as_object() {
            Some(obj) => obj,
            None => {
                warn!(item_id, "non-struct record skipped");
                return Ok(None);
            }
        };

        let metadata = obj
            .get(METADATA_FIELD)
            .and_then(Value::as_object)
            .ok_or_else(|| format!("item {item_id}: record has no metadata"))?;

        let record_type = metadata.get(RECORD_TYPE_FIELD).and_then(Value::as_str);
        if record_type != Some(RECORD_TYPE_DATA) {
            debug!(item_id, record_type, "control record skipped");
            return Ok(None);
        }

        let operation = match metadata.get(OPERATION_FIELD).and_then(Value::as_str) {
            Some("load") | Some("insert") => Operation::Insert,
            Some("update") => Operation::Update,
            Some("delete") => Operation::Delete,
            other => {
                warn!(item_id, operation = other, "unsupported operation skipped");
                return Ok(None);
            }
        };

        let source_table = metadata
            .get(TABLE_NAME_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("item {item_id}: record has no table name"))?;

        let target_table = match self.mapper.map_table_name(source_table) {
            Some(table) => table,
            None => {
                debug!(item_id, source_table, "no mapping for source table, skipped");
                return Ok(None);
            }
        };

        let empty = Map::new();
        let data = obj
            .get(DATA_FIELD)
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let before_image = obj
            .get(&self.before_image_field)
            .and_then(Value::as_object);

        let id = self
            .mapper
            .map_primary_key(source_table, data, before_image)
            .ok_or_else(|| format!("item {item_id}: record carries no identity value"))?;

        let mut event = LoadEvent::new(operation, target_table).with_id(id);
        match operation {
            Operation::Insert | Operation::Update => {
                let mapped = self
                    .mapper
                    .map_data_record(source_table, data)
                    .unwrap_or_default();
                event = event.with_revision(Value::Object(mapped));
                // A full load arrives unversioned; pin inserts to the start
                if operation == Operation::Insert {
                    event = event.with_version(0);
                }
            }
            _ => {}
        }
        Ok(Some(event))
    }
}

#[async_trait]
impl ChannelDispatcher for CdcDispatcher {
    type Batch = Vec<StreamRecord>;
    type Response = ();

    async fn dispatch(&self, batch: Self::Batch) -> DispatchResult<Self::Response> {
        for (index, record) in batch.iter().enumerate() {
            let item_id = record.item_id(index);
            let bytes = payload::decode_body(&item_id, &record.data)?;
            let documents = payload::documents_in(&item_id, &bytes)?;

            for document in &documents {
                let event = match self.translate(&item_id, document) {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(message) => {
                        return Err(DispatchError::ItemFailed {
                            item_id: item_id.clone(),
                            message,
                        })
                    }
                };
                if let ItemOutcome::Failed(message) =
                    apply_event(&self.writer, &event, &item_id).await
                {
                    return Err(DispatchError::ItemFailed {
                        item_id: item_id.clone(),
                        message,
                    });
                }
            }
        }
        Ok(())
    }
}
