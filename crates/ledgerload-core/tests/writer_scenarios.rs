//! Apply-core contract tests against the in-memory ledger driver.
//!
//! These exercise the validation pipeline end to end: insert/update/delete
//! ordering, idempotency across retries, strict-mode policy, batch
//! atomicity, and the OCC retry loop.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use ledgerload_core::ledger::MemoryLedger;
use ledgerload_core::writer::OLD_DOCUMENT_ID_FIELD;
use ledgerload_core::{
    BackLinkStrategy, FieldMappedStrategy, LedgerDriver, LoadError, LoadEvent, LoaderConfig,
    Operation, RevisionStrategy, RevisionWriter,
};

async fn writer_on(
    ledger: &Arc<MemoryLedger>,
    strategy: Arc<dyn RevisionStrategy>,
    strict: bool,
) -> RevisionWriter {
    let driver: Arc<dyn LedgerDriver> = Arc::clone(ledger) as Arc<dyn LedgerDriver>;
    RevisionWriter::new(driver, strategy, strict, 3).await.unwrap()
}

async fn backlink_writer(ledger: &Arc<MemoryLedger>, strict: bool) -> RevisionWriter {
    writer_on(ledger, Arc::new(BackLinkStrategy::new()), strict).await
}

fn person_insert(id: &str, name: &str) -> LoadEvent {
    LoadEvent::new(Operation::Insert, "Person")
        .with_id(json!(id))
        .with_version(0)
        .with_revision(json!({"n": name}))
}

#[tokio::test]
async fn insert_then_duplicate_skips() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;
    let event = person_insert("P1", "A");

    let first = writer.write_event(&event).await.unwrap();
    assert!(first.is_pass());

    let second = writer.write_event(&event).await.unwrap();
    assert!(second.is_skip());

    assert_eq!(ledger.document_count("Person"), 1);
    let cur = ledger
        .committed("Person", OLD_DOCUMENT_ID_FIELD, &json!("P1"))
        .unwrap();
    assert_eq!(cur.metadata.version, 0);
}

#[tokio::test]
async fn in_order_update_advances_the_version() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;
    writer.write_event(&person_insert("P1", "A")).await.unwrap();

    let update = LoadEvent::new(Operation::Update, "Person")
        .with_id(json!("P1"))
        .with_version(1)
        .with_revision(json!({"n": "B"}));
    let result = writer.write_event(&update).await.unwrap();
    assert!(result.is_pass());

    let cur = ledger
        .committed("Person", OLD_DOCUMENT_ID_FIELD, &json!("P1"))
        .unwrap();
    assert_eq!(cur.metadata.version, 1);
    assert_eq!(cur.data.unwrap()["n"], json!("B"));
}

#[tokio::test]
async fn version_gap_fails_and_mutates_nothing() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;
    writer.write_event(&person_insert("P1", "A")).await.unwrap();

    let gapped = LoadEvent::new(Operation::Update, "Person")
        .with_id(json!("P1"))
        .with_version(3)
        .with_revision(json!({"n": "C"}));
    let result = writer.write_event(&gapped).await.unwrap();
    assert!(result.is_fail());
    assert!(result.message().unwrap().contains("out-of-order"));

    let cur = ledger
        .committed("Person", OLD_DOCUMENT_ID_FIELD, &json!("P1"))
        .unwrap();
    assert_eq!(cur.metadata.version, 0);
    assert_eq!(cur.data.unwrap()["n"], json!("A"));
}

#[tokio::test]
async fn delete_without_predecessor_follows_strict_mode() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));

    let relaxed = backlink_writer(&ledger, false).await;
    let event = LoadEvent::new(Operation::Delete, "Person").with_id(json!("X"));
    let result = relaxed.write_event(&event).await.unwrap();
    assert!(result.is_skip());

    let strict = backlink_writer(&ledger, true).await;
    let result = strict.write_event(&event).await.unwrap();
    assert!(result.is_fail());

    assert_eq!(ledger.document_count("Person"), 0);
}

#[tokio::test]
async fn delete_removes_from_the_committed_view() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;
    writer.write_event(&person_insert("P1", "A")).await.unwrap();

    let delete = LoadEvent::new(Operation::Delete, "Person")
        .with_id(json!("P1"))
        .with_version(1);
    assert!(writer.write_event(&delete).await.unwrap().is_pass());
    assert_eq!(ledger.document_count("Person"), 0);

    // With the document gone, a fresh insert validates against absence
    let again = writer.write_event(&person_insert("P1", "A2")).await.unwrap();
    assert!(again.is_pass());
}

#[tokio::test]
async fn any_resolves_to_insert_then_skip_then_update() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;

    let any = LoadEvent::new(Operation::Any, "Person")
        .with_id(json!("P2"))
        .with_revision(json!({"n": "Q"}));

    // Empty ledger: resolves to INSERT
    assert!(writer.write_event(&any).await.unwrap().is_pass());
    let cur = ledger
        .committed("Person", OLD_DOCUMENT_ID_FIELD, &json!("P2"))
        .unwrap();
    assert_eq!(cur.metadata.version, 0);

    // Same event again: current present, version unknown
    assert!(writer.write_event(&any).await.unwrap().is_skip());

    // With the next version asserted: resolves to UPDATE
    let versioned = any.clone().with_version(1);
    assert!(writer.write_event(&versioned).await.unwrap().is_pass());
    let cur = ledger
        .committed("Person", OLD_DOCUMENT_ID_FIELD, &json!("P2"))
        .unwrap();
    assert_eq!(cur.metadata.version, 1);
}

#[tokio::test]
async fn any_with_current_and_no_revision_deletes() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;
    writer.write_event(&person_insert("P1", "A")).await.unwrap();

    let tombstone = LoadEvent::new(Operation::Any, "Person")
        .with_id(json!("P1"))
        .with_version(1);
    assert!(writer.write_event(&tombstone).await.unwrap().is_pass());
    assert_eq!(ledger.document_count("Person"), 0);
}

#[tokio::test]
async fn versioned_events_are_idempotent() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;
    writer.write_event(&person_insert("P1", "A")).await.unwrap();

    let update = LoadEvent::new(Operation::Update, "Person")
        .with_id(json!("P1"))
        .with_version(1)
        .with_revision(json!({"n": "B"}));
    assert!(writer.write_event(&update).await.unwrap().is_pass());

    // Redelivery of the same revision is a no-op
    assert!(writer.write_event(&update).await.unwrap().is_skip());
    let cur = ledger
        .committed("Person", OLD_DOCUMENT_ID_FIELD, &json!("P1"))
        .unwrap();
    assert_eq!(cur.metadata.version, 1);
}

#[tokio::test]
async fn inactive_table_skips_before_the_transaction() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    ledger.create_table("Archive");
    ledger.set_table_active("Archive", false);
    let writer = backlink_writer(&ledger, true).await;

    let event = LoadEvent::new(Operation::Insert, "Archive")
        .with_id(json!("A1"))
        .with_revision(json!({"n": "A"}));
    let result = writer.write_event(&event).await.unwrap();
    assert!(result.is_skip());
    assert!(result.message().unwrap().contains("Archive"));
    assert_eq!(ledger.document_count("Archive"), 0);
}

#[tokio::test]
async fn structurally_invalid_event_fails() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;

    // UPDATE without a revision is not a valid event
    let event = LoadEvent::new(Operation::Update, "Person").with_id(json!("P1"));
    let result = writer.write_event(&event).await.unwrap();
    assert!(result.is_fail());
}

#[tokio::test]
async fn commit_conflicts_are_retried_to_success() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;

    ledger.inject_conflicts(2);
    let result = writer.write_event(&person_insert("P1", "A")).await.unwrap();
    assert!(result.is_pass());
    assert_eq!(ledger.document_count("Person"), 1);
}

#[tokio::test]
async fn exhausted_conflict_retries_surface_the_error() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;

    ledger.inject_conflicts(10);
    let err = writer
        .write_event(&person_insert("P1", "A"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Ledger(ledgerload_core::LedgerError::Conflict(_))
    ));
}

#[tokio::test]
async fn batch_applies_all_or_nothing() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;

    let batch = vec![person_insert("P1", "A"), person_insert("P2", "B")];
    writer.write_events(&batch).await.unwrap();
    assert_eq!(ledger.document_count("Person"), 2);
}

#[tokio::test]
async fn batch_aborts_when_one_event_does_not_pass() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;

    // Second event is a strict-mode failure (no predecessor)
    let batch = vec![
        person_insert("P1", "A"),
        LoadEvent::new(Operation::Update, "Person")
            .with_id(json!("missing"))
            .with_version(2)
            .with_revision(json!({"n": "X"})),
    ];
    let err = writer.write_events(&batch).await.unwrap_err();
    assert!(matches!(err, LoadError::BatchRejected { index: 1, .. }));

    // The passing insert was rolled back with the batch
    assert_eq!(ledger.document_count("Person"), 0);
}

#[tokio::test]
async fn batch_drops_poorly_formed_events_up_front() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let writer = backlink_writer(&ledger, true).await;

    let batch = vec![
        LoadEvent::default(), // no operation, no table
        person_insert("P1", "A"),
    ];
    writer.write_events(&batch).await.unwrap();
    assert_eq!(ledger.document_count("Person"), 1);
}

#[tokio::test]
async fn writer_builds_from_process_configuration() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let config = LoaderConfig::from_lookup(|name| match name {
        "LEDGER_NAME" => Some("people".to_string()),
        "STRICT_MODE" => Some("false".to_string()),
        "MAX_SESSIONS_PER_LAMBDA" => Some("4".to_string()),
        _ => None,
    })
    .unwrap();

    let driver: Arc<dyn LedgerDriver> = Arc::clone(&ledger) as Arc<dyn LedgerDriver>;
    let writer = RevisionWriter::from_config(driver, &config).await.unwrap();

    // The configured relaxed mode turns a missing predecessor into a skip
    let event = LoadEvent::new(Operation::Delete, "Person").with_id(json!("X"));
    assert!(writer.write_event(&event).await.unwrap().is_skip());
}

#[tokio::test]
async fn field_mapped_strategy_looks_up_by_configured_field() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person"]));
    let mut fields = HashMap::new();
    fields.insert("Person".to_string(), "GovId".to_string());
    let writer = writer_on(&ledger, Arc::new(FieldMappedStrategy::new(fields)), true).await;

    let insert = LoadEvent::new(Operation::Insert, "Person")
        .with_id(json!("8787"))
        .with_version(0)
        .with_revision(json!({"GovId": "8787", "FirstName": "John"}));
    assert!(writer.write_event(&insert).await.unwrap().is_pass());

    // No back-link is stamped; the configured field is the identity
    let cur = ledger.committed("Person", "GovId", &json!("8787")).unwrap();
    assert!(cur.data.as_ref().unwrap().get(OLD_DOCUMENT_ID_FIELD).is_none());

    let update = LoadEvent::new(Operation::Update, "Person")
        .with_id(json!("8787"))
        .with_version(1)
        .with_revision(json!({"GovId": "8787", "FirstName": "Jane"}));
    assert!(writer.write_event(&update).await.unwrap().is_pass());

    let cur = ledger.committed("Person", "GovId", &json!("8787")).unwrap();
    assert_eq!(cur.metadata.version, 1);
    assert_eq!(cur.data.unwrap()["FirstName"], json!("Jane"));
}

#[tokio::test]
async fn field_mapped_strategy_skips_unmapped_tables() {
    let ledger = Arc::new(MemoryLedger::with_tables(&["Person", "Vehicle"]));
    let mut fields = HashMap::new();
    fields.insert("Person".to_string(), "GovId".to_string());
    let writer = writer_on(&ledger, Arc::new(FieldMappedStrategy::new(fields)), true).await;

    let event = LoadEvent::new(Operation::Insert, "Vehicle")
        .with_id(json!("V1"))
        .with_revision(json!({"Vin": "V1"}));
    let result = writer.write_event(&event).await.unwrap();
    assert!(result.is_skip());
    assert!(result.message().unwrap().contains("identity field"));
}
