//! Import pipeline tests
//!
//! Drives whole imports through the public API: format dispatch, extraction,
//! counting, progress events, cancellation and persistence of the result.

use std::io::Write;
use std::sync::Arc;

use serde_json::{json, Value};
use takeout_explorer::analysis::Analyzer;
use takeout_explorer::config::Settings;
use takeout_explorer::models::{ImportKind, ImportStatus, PageId, Payload, ProgressEvent};
use takeout_explorer::services::{ImportError, ImportOptions, ImportRequest, Importer};
use takeout_explorer::store::PageStore;
use tokio::sync::mpsc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

fn importer_with(dir: &tempfile::TempDir, options: ImportOptions) -> Importer {
    let settings = Settings::with_data_dir(dir.path().to_path_buf());
    let store = PageStore::open(&settings).unwrap();
    Importer::new(Arc::new(store), Analyzer::default(), options)
}

fn importer(dir: &tempfile::TempDir) -> Importer {
    importer_with(dir, ImportOptions::default())
}

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

async fn drain(mut rx: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

async fn import_json(importer: &Importer, page: &str, doc: &Value) -> Arc<takeout_explorer::NormalizedRecord> {
    let request = ImportRequest::from_bytes(page, "export.json", serde_json::to_vec(doc).unwrap());
    let (handle, rx) = importer.start(request).unwrap();
    drain(rx).await;
    handle.wait().await.unwrap()
}

/// Whether `needle` appears anywhere inside `haystack`.
fn contains_value(haystack: &Value, needle: &Value) -> bool {
    if haystack == needle {
        return true;
    }
    match haystack {
        Value::Array(items) => items.iter().any(|v| contains_value(v, needle)),
        Value::Object(map) => map.values().any(|v| contains_value(v, needle)),
        _ => false,
    }
}

#[tokio::test]
async fn browser_history_container_is_extracted() {
    let dir = tempfile::tempdir().unwrap();
    let importer = importer(&dir);
    let doc = json!({"Browser History": [
        {"url": "http://a.com", "time_usec": 1},
        {"url": "http://b.com", "time_usec": 2}
    ]});

    let record = import_json(&importer, "browser", &doc).await;

    assert_eq!(record.kind, ImportKind::SingleDocumentImport);
    assert_eq!(record.metadata.total_records, 2);
    assert_eq!(record.payload, Payload::Loaded(doc["Browser History"].clone()));
}

#[tokio::test]
async fn long_unrecognized_array_found_by_deep_search() {
    let dir = tempfile::tempdir().unwrap();
    let importer = importer(&dir);
    let doc = json!({
        "config": {"x": 1},
        "unrelated_array": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]
    });

    let record = import_json(&importer, "overview", &doc).await;

    assert_eq!(record.metadata.total_records, 11);
    assert_eq!(record.payload, Payload::Loaded(doc["unrelated_array"].clone()));
}

#[tokio::test]
async fn document_without_arrays_is_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let importer = importer(&dir);
    let doc = json!({"a": {"b": {"c": 5}}});

    let record = import_json(&importer, "overview", &doc).await;

    assert_eq!(record.metadata.total_records, 1);
    assert_eq!(record.payload, Payload::Loaded(doc));
}

#[tokio::test]
async fn archive_with_corrupt_entry_completes() {
    let dir = tempfile::tempdir().unwrap();
    let importer = importer(&dir);
    let mut bytes = zip_of(&[
        ("Takeout/Chrome/BrowserHistory.json", br#"{"Browser History": [{"url": "http://a.com"}]}"#),
        ("Takeout/Chrome/Devices.json", br#"{"Device Info": [{"name": "pixel"}]}"#),
        ("Takeout/Chrome/Extensions.json", br#"{"Extensions": ["XYZZYCORRUPT"]}"#),
    ]);
    let pos = bytes
        .windows(b"XYZZYCORRUPT".len())
        .position(|w| w == b"XYZZYCORRUPT")
        .unwrap();
    bytes[pos] ^= 0xFF;

    let request = ImportRequest::from_bytes("browser", "takeout-20240101.zip", bytes);
    let (handle, rx) = importer.start(request).unwrap();
    let events = drain(rx).await;
    let record = handle.wait().await.unwrap();

    assert_eq!(events.last().unwrap().status, ImportStatus::Complete);
    assert_eq!(record.kind, ImportKind::ArchiveImport);
    let entries = record.payload.as_value().unwrap().as_object().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(!entries.contains_key("Takeout/Chrome/Extensions.json"));
    assert_eq!(record.metadata.total_records, 2);
    assert_eq!(
        record.metadata.skipped_entries[0].name,
        "Takeout/Chrome/Extensions.json"
    );
}

#[tokio::test]
async fn progress_is_ordered_and_ends_once() {
    let dir = tempfile::tempdir().unwrap();
    let importer = importer_with(
        &dir,
        ImportOptions {
            record_chunk_size: 7,
            ..ImportOptions::default()
        },
    );
    let records: Vec<_> = (0..100).map(|i| json!({"title": i})).collect();
    let request = ImportRequest::from_bytes(
        "activity",
        "MyActivity.json",
        serde_json::to_vec(&records).unwrap(),
    );

    let (handle, rx) = importer.start(request).unwrap();
    let events = drain(rx).await;
    handle.wait().await.unwrap();

    for pair in events.windows(2) {
        assert!(pair[0].progress <= pair[1].progress);
        assert!(pair[0].records_processed <= pair[1].records_processed);
    }
    let terminal: Vec<_> = events.iter().filter(|e| e.status.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(events.last().unwrap().status, ImportStatus::Complete);
    assert_eq!(events.last().unwrap().progress, 100.0);
    assert_eq!(events.last().unwrap().records_processed, 100);
    // 100 records in chunks of 7 is 15 chunk events
    assert!(events.len() >= 15);
}

#[tokio::test]
async fn cancellation_leaves_prior_value() {
    let dir = tempfile::tempdir().unwrap();
    let importer = importer_with(
        &dir,
        ImportOptions {
            record_chunk_size: 100,
            ..ImportOptions::default()
        },
    );
    let page = PageId::from("browser");

    let prior = import_json(&importer, "browser", &json!([{"url": "http://prior.com"}])).await;

    let records: Vec<_> = (0..10_000)
        .map(|i| json!({"url": format!("http://site.com/{}", i), "time_usec": i}))
        .collect();
    let request = ImportRequest::from_bytes(
        "browser",
        "History.json",
        serde_json::to_vec(&json!({"Browser History": records})).unwrap(),
    );
    let (handle, rx) = importer.start(request).unwrap();
    // Nothing can be persisted until this task yields
    handle.cancel();

    let events = drain(rx).await;
    assert!(matches!(handle.wait().await, Err(ImportError::Cancelled)));
    assert_eq!(events.last().unwrap().status, ImportStatus::Cancelled);

    assert_eq!(importer.store().get_page_data(&page), Some(prior.clone()));
    let stored = importer.store().load_page_data_from_db(&page).await.unwrap();
    assert_eq!(stored.id, prior.id);
}

#[tokio::test]
async fn import_completes_while_progress_goes_unread() {
    let dir = tempfile::tempdir().unwrap();
    let importer = importer(&dir);
    let records: Vec<_> = (0..100_000)
        .map(|i| json!({"url": format!("http://site.com/{}", i), "time_usec": i}))
        .collect();
    let request = ImportRequest::from_bytes(
        "browser",
        "History.json",
        serde_json::to_vec(&records).unwrap(),
    );

    let (handle, _rx) = importer.start(request).unwrap();
    let record = tokio::time::timeout(std::time::Duration::from_secs(60), handle.wait())
        .await
        .expect("import stalled on its progress channel")
        .unwrap();

    assert_eq!(record.metadata.total_records, 100_000);
    let stored = importer.store().get_page_data(&PageId::from("browser")).unwrap();
    assert_eq!(stored.id, record.id);
}

#[tokio::test]
async fn failed_import_reports_error_event() {
    let dir = tempfile::tempdir().unwrap();
    let importer = importer(&dir);
    let request = ImportRequest::from_bytes("browser", "broken.json", b"[{\"url\": ".to_vec());

    let (handle, rx) = importer.start(request).unwrap();
    let events = drain(rx).await;
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(err, ImportError::Parse(_)));
    let last = events.last().unwrap();
    assert_eq!(last.status, ImportStatus::Error);
    assert!(last.error.is_some());
    assert!(importer
        .store()
        .get_page_data(&PageId::from("browser"))
        .is_none());
}

#[tokio::test]
async fn unsupported_file_type_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let importer = importer(&dir);
    let request = ImportRequest::from_bytes("browser", "photo.jpg", vec![0xFF, 0xD8]);
    assert!(matches!(
        importer.start(request).err(),
        Some(ImportError::Parse(_))
    ));
}

#[test]
fn counting_an_extracted_array_returns_its_length() {
    let analyzer = Analyzer::default();
    for doc in [
        json!([]),
        json!([1]),
        json!([{"a": 1}, {"b": [1, 2, 3]}]),
        json!((0..50).collect::<Vec<_>>()),
    ] {
        let len = doc.as_array().unwrap().len() as u64;
        let extracted = analyzer.extract(&doc);
        assert_eq!(analyzer.count_records(extracted.records), len);
    }
}

#[test]
fn non_empty_documents_count_at_least_one() {
    let analyzer = Analyzer::default();
    for doc in [
        json!({"a": 1}),
        json!([1]),
        json!("just a string"),
        json!(42),
        json!({"nested": {"deeper": {"k": null}}}),
        json!({"empty_list": [], "name": "x"}),
    ] {
        assert!(analyzer.count_records(&doc) >= 1, "{}", doc);
    }
}

#[test]
fn extraction_never_invents_data() {
    let analyzer = Analyzer::default();
    for doc in [
        json!({"Browser History": [{"url": "http://a.com"}]}),
        json!({"data": {"items": [{"id": 1}, {"id": 2}]}}),
        json!({"meta": {"v": 1}, "deep": {"list": [{"time": "2024-01-01T00:00:00Z"}]}}),
        json!({"a": {"b": {"c": 5}}}),
    ] {
        let extracted = analyzer.extract(&doc);
        match extracted.records {
            Value::Array(items) => {
                for item in items {
                    assert!(contains_value(&doc, item));
                }
            }
            other => assert!(contains_value(&doc, other)),
        }
    }
}
