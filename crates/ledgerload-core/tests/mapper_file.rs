//! File-driven mapper loading, including the fatal startup paths.

use std::io::Write;

use serde_json::{json, Value};

use ledgerload_core::document::JsonMap;
use ledgerload_core::{ConfigError, FileTableMapper, LoadEventMapper};

const SAMPLE: &str = r#"[
    {
        "source-table": "person",
        "target-table": "Person",
        "id-field": "gov_id",
        "fields": [
            {"source-field": "gov_id", "target-field": "GovId"},
            {"source-field": "first_name", "target-field": "FirstName"},
            {"source-field": "last_name", "target-field": "LastName"}
        ]
    },
    {
        "source-table": "vehicle",
        "target-table": "Vehicle",
        "id-field": "vin",
        "fields": [
            {"source-field": "vin", "target-field": "Vin"}
        ]
    }
]"#;

fn record(value: Value) -> JsonMap {
    value.as_object().unwrap().clone()
}

#[test]
fn loads_the_sample_mapping_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let mapper = FileTableMapper::from_path(file.path()).unwrap();

    let source = record(json!({
        "gov_id": "8787", "first_name": "John", "last_name": "Doe"
    }));
    assert_eq!(mapper.map_table_name("person"), Some("Person".to_string()));
    assert_eq!(
        mapper.map_primary_key("person", &source, None),
        Some(json!("8787"))
    );
    assert_eq!(
        Value::Object(mapper.map_data_record("person", &source).unwrap()),
        json!({"GovId": "8787", "FirstName": "John", "LastName": "Doe"})
    );

    assert_eq!(mapper.map_table_name("vehicle"), Some("Vehicle".to_string()));
}

#[test]
fn missing_file_is_a_fatal_initialization_error() {
    let err = FileTableMapper::from_path("/nonexistent/mappings.json").unwrap_err();
    assert!(matches!(err, ConfigError::MappingFile { .. }));
}

#[test]
fn malformed_file_is_a_fatal_initialization_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{\"not\": \"a list\"}").unwrap();

    let err = FileTableMapper::from_path(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::MappingParse(_)));
}

#[test]
fn schema_incomplete_file_is_a_fatal_initialization_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"[{"source-table": "a", "target-table": "", "id-field": "k"}]"#)
        .unwrap();

    let err = FileTableMapper::from_path(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::MappingParse(_)));
}
