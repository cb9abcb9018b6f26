//! Back-link revision strategy (default)
//!
//! Written revisions carry an `oldDocumentId` field holding the event's
//! source-side identity. Lookups query the committed view on that field,
//! which is what makes re-application of the same source record idempotent.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::LedgerError;
use crate::event::LoadEvent;
use crate::ledger::{CommittedRevision, LedgerTransaction};

use super::RevisionStrategy;

/// Field stamped on written revisions to back-link the source identity.
pub const OLD_DOCUMENT_ID_FIELD: &str = "oldDocumentId";

/// Default [`RevisionStrategy`]: source identity travels with the revision.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackLinkStrategy;

impl BackLinkStrategy {
    pub fn new() -> Self {
        BackLinkStrategy
    }
}

#[async_trait]
impl RevisionStrategy for BackLinkStrategy {
    async fn read_current(
        &self,
        txn: &mut dyn LedgerTransaction,
        event: &LoadEvent,
    ) -> Result<Option<CommittedRevision>, LedgerError> {
        let id = match &event.id {
            Some(id) => id,
            None => return Ok(None),
        };
        if event.table.is_empty() {
            return Ok(None);
        }
        txn.find_by_field(&event.table, OLD_DOCUMENT_ID_FIELD, id)
            .await
    }

    fn adjust_revision(&self, event: &LoadEvent) -> Option<Value> {
        let mut revision = event.revision.clone()?;
        if let (Some(obj), Some(id)) = (revision.as_object_mut(), &event.id) {
            obj.insert(OLD_DOCUMENT_ID_FIELD.to_string(), id.clone());
        }
        Some(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Operation;
    use serde_json::json;

    #[test]
    fn stamps_the_back_link_on_a_derived_value() {
        let event = LoadEvent::new(Operation::Insert, "Person")
            .with_id(json!("P1"))
            .with_revision(json!({"n": "A"}));

        let adjusted = BackLinkStrategy::new().adjust_revision(&event).unwrap();
        assert_eq!(adjusted, json!({"n": "A", "oldDocumentId": "P1"}));
        // The event itself is untouched
        assert_eq!(event.revision, Some(json!({"n": "A"})));
    }

    #[test]
    fn no_id_means_no_stamp() {
        let event = LoadEvent::new(Operation::Insert, "Person").with_revision(json!({"n": "A"}));
        let adjusted = BackLinkStrategy::new().adjust_revision(&event).unwrap();
        assert_eq!(adjusted, json!({"n": "A"}));
    }

    #[test]
    fn no_revision_derives_nothing() {
        let event = LoadEvent::new(Operation::Delete, "Person").with_id(json!("P1"));
        assert!(BackLinkStrategy::new().adjust_revision(&event).is_none());
    }
}
