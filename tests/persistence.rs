//! Persistence tests
//!
//! Exercises the page store across simulated restarts: a store is opened on
//! a data directory, dropped, and a fresh one opened on the same directory.

use std::sync::Arc;

use serde_json::json;
use takeout_explorer::analysis::Analyzer;
use takeout_explorer::config::Settings;
use takeout_explorer::models::{ImportKind, NormalizedRecord, PageId, Payload, RecordMetadata};
use takeout_explorer::services::{ImportOptions, ImportRequest, Importer};
use takeout_explorer::store::PageStore;

fn settings(dir: &tempfile::TempDir) -> Settings {
    Settings {
        known_pages: vec![PageId::from("browser"), PageId::from("devices")],
        ..Settings::with_data_dir(dir.path().to_path_buf())
    }
}

fn record() -> NormalizedRecord {
    let payload = json!([
        {"url": "http://a.com", "time_usec": 1},
        {"url": "http://b.com", "time_usec": 2}
    ]);
    let analyzer = Analyzer::default();
    let metadata = analyzer.describe(&payload, &payload);
    NormalizedRecord::new(ImportKind::SingleDocumentImport, "History.json", 90, payload, metadata)
}

#[tokio::test]
async fn rehydration_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let page = PageId::from("browser");
    let original = record();

    {
        let store = PageStore::open(&settings(&dir)).unwrap();
        store.set_page_data(&page, Some(original.clone())).await.unwrap();
    }

    let store = PageStore::open(&settings(&dir)).unwrap();

    // Metadata is there before any bulk read
    let early = store.get_page_data(&page).unwrap();
    assert_eq!(early.payload, Payload::Elsewhere);
    assert_eq!(early.metadata.total_records, 2);
    assert_eq!(early.file_name, "History.json");
    assert_eq!(early.byte_size, 90);

    let report = store.initialize_from_db().await;
    assert_eq!(report.loaded, vec![page.clone()]);
    assert_eq!(report.empty, vec![PageId::from("devices")]);
    assert!(report.failed.is_empty());

    let loaded = store.load_page_data_from_db(&page).await.unwrap();
    assert_eq!(*loaded, original);
    assert_eq!(store.get_page_data(&page).as_deref(), Some(&original));
}

#[tokio::test]
async fn imported_record_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let page = PageId::from("devices");

    let imported = {
        let store = Arc::new(PageStore::open(&settings(&dir)).unwrap());
        let importer = Importer::new(store, Analyzer::default(), ImportOptions::default());
        let doc = json!({"Device Info": [{"name": "pixel"}, {"name": "laptop"}]});
        let request = ImportRequest::from_bytes(
            page.clone(),
            "Devices.json",
            serde_json::to_vec(&doc).unwrap(),
        );
        let (handle, mut rx) = importer.start(request).unwrap();
        while rx.recv().await.is_some() {}
        handle.wait().await.unwrap()
    };

    let store = PageStore::open(&settings(&dir)).unwrap();
    assert!(!store.is_payload_loaded(&page));
    let loaded = store.load_page_data_from_db(&page).await.unwrap();
    assert_eq!(loaded, imported);
    assert!(store.is_payload_loaded(&page));
}

#[tokio::test]
async fn deeply_nested_document_reloads_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let page = PageId::from("browser");
    let depth = 127;
    let text = format!("{}1{}", "[".repeat(depth), "]".repeat(depth));

    let imported = {
        let store = Arc::new(PageStore::open(&settings(&dir)).unwrap());
        let importer = Importer::new(store, Analyzer::default(), ImportOptions::default());
        let request = ImportRequest::from_bytes(page.clone(), "nested.json", text.into_bytes());
        let (handle, mut rx) = importer.start(request).unwrap();
        while rx.recv().await.is_some() {}
        handle.wait().await.unwrap()
    };

    let store = PageStore::open(&settings(&dir)).unwrap();
    let loaded = store.try_load_page_data(&page).await.unwrap().unwrap();
    assert_eq!(loaded, imported);
}

#[tokio::test]
async fn cleared_page_stays_cleared_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let page = PageId::from("browser");
    {
        let store = PageStore::open(&settings(&dir)).unwrap();
        store.set_page_data(&page, Some(record())).await.unwrap();
        store.set_page_data(&page, None).await.unwrap();
    }

    let store = PageStore::open(&settings(&dir)).unwrap();
    assert!(store.get_page_data(&page).is_none());
    let report = store.initialize_from_db().await;
    assert!(report.loaded.is_empty());
}

#[tokio::test]
async fn clear_all_resets_every_page() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = PageStore::open(&settings(&dir)).unwrap();
        store
            .set_page_data(&PageId::from("browser"), Some(record()))
            .await
            .unwrap();
        store
            .set_page_data(&PageId::from("devices"), Some(record()))
            .await
            .unwrap();
        store.clear_all_data().await.unwrap();
        assert!(store.pages().iter().all(|(_, r)| r.is_none()));
    }

    let store = PageStore::open(&settings(&dir)).unwrap();
    assert!(store.pages().iter().all(|(_, r)| r.is_none()));
    assert!(store
        .load_page_data_from_db(&PageId::from("browser"))
        .await
        .is_none());
}

#[tokio::test]
async fn corrupt_mirror_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    let page = PageId::from("browser");
    {
        let store = PageStore::open(&settings).unwrap();
        store.set_page_data(&page, Some(record())).await.unwrap();
    }
    std::fs::write(settings.metadata_path(), "{ truncated").unwrap();

    let store = PageStore::open(&settings).unwrap();
    assert!(store.get_page_data(&page).is_none());

    // The bulk store still has the payload
    let report = store.initialize_from_db().await;
    assert_eq!(report.loaded, vec![page.clone()]);
    assert!(store.is_payload_loaded(&page));
}

#[tokio::test]
async fn metadata_mirror_holds_no_payload() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    let store = PageStore::open(&settings).unwrap();
    let metadata = RecordMetadata {
        total_records: 1,
        ..RecordMetadata::default()
    };
    let rec = NormalizedRecord::new(
        ImportKind::SingleDocumentImport,
        "secret.json",
        20,
        json!([{"token": "do-not-mirror"}]),
        metadata,
    );
    store
        .set_page_data(&PageId::from("browser"), Some(rec))
        .await
        .unwrap();

    let mirror = std::fs::read_to_string(settings.metadata_path()).unwrap();
    assert!(mirror.contains("secret.json"));
    assert!(!mirror.contains("do-not-mirror"));
}
