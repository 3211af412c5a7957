//! Integration tests for the metadata cache refresh cycle

use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::broadcast;
use trackpanel_core::cache::persist;
use trackpanel_core::fetcher::{EntityRecord, Filter, NotificationHub, RequestKind};
use trackpanel_core::models::{FieldDescriptor, FieldSchema, SchemaPayload, TypeDescriptor, TypeSchema};
use trackpanel_core::{
    CacheConfig, CacheEvent, FetchNotification, FetchPayload, Fetcher, JsonExportFetcher,
    LoadSource, RequestId, SchemaCache,
};

/// Counts requests; the test decides when and how each one is answered
struct MockFetcher {
    hub: NotificationHub,
    schema_calls: AtomicUsize,
    entity_calls: AtomicUsize,
}

impl MockFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            hub: NotificationHub::new("mock", 32),
            schema_calls: AtomicUsize::new(0),
            entity_calls: AtomicUsize::new(0),
        })
    }

    fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }

    fn entity_calls(&self) -> usize {
        self.entity_calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    fn fetch_schema(&self, _project_id: i64) -> RequestId {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        self.hub.next_request_id()
    }

    fn fetch_entities(&self, _entity_type: &str, _filters: &[Filter], _fields: &[&str]) -> RequestId {
        self.entity_calls.fetch_add(1, Ordering::SeqCst);
        self.hub.next_request_id()
    }

    fn subscribe(&self) -> broadcast::Receiver<FetchNotification> {
        self.hub.subscribe()
    }
}

fn config(dir: &TempDir) -> CacheConfig {
    CacheConfig::with_cache_dir(dir.path()).with_project_id(122)
}

fn shot_schema() -> SchemaPayload {
    SchemaPayload {
        fields: FieldSchema::from([(
            "Shot".to_string(),
            HashMap::from([(
                "sg_status_list".to_string(),
                FieldDescriptor::new("Status", "status_list"),
            )]),
        )]),
        types: TypeSchema::from([
            ("Shot".to_string(), TypeDescriptor::new("Shot")),
            ("CustomEntity03".to_string(), TypeDescriptor::new("Asset Library")),
        ]),
    }
}

fn status_records() -> Vec<EntityRecord> {
    vec![
        json!({"code": "ip", "name": "In Progress", "bg_color": "202,244,231"}),
        json!({"code": "hld", "name": "On Hold"}),
    ]
    .into_iter()
    .filter_map(|v| v.as_object().cloned())
    .collect()
}

/// Trigger a schema fetch and answer it successfully
fn load_schema(cache: &SchemaCache, mock: &MockFetcher) {
    cache.get_type_display_name("Shot");
    let id = cache.snapshot().pending_schema.expect("schema fetch issued");
    mock.hub
        .complete(id, RequestKind::Schema, FetchPayload::Schema(shot_schema()));
    cache.dispatch_pending();
}

#[test]
fn test_unknown_entity_types_pass_through() {
    let dir = tempdir().unwrap();
    let cache = SchemaCache::new(config(&dir));
    let mock = MockFetcher::new();
    cache.register_fetcher(mock.clone());
    load_schema(&cache, &mock);

    for raw in ["Version", "CustomEntity99", "", "shot"] {
        assert_eq!(cache.get_type_display_name(raw), raw);
    }
    assert_eq!(cache.get_type_display_name("CustomEntity03"), "Asset Library");
}

#[test]
fn test_type_field_label_regardless_of_state() {
    let dir = tempdir().unwrap();
    let cache = SchemaCache::new(config(&dir));
    assert_eq!(cache.get_field_display_name("Shot", "type"), "Type");
    assert_eq!(cache.get_field_display_name("Nope", "type"), "Type");

    let mock = MockFetcher::new();
    cache.register_fetcher(mock.clone());
    load_schema(&cache, &mock);
    assert_eq!(cache.get_field_display_name("Shot", "type"), "Type");
    assert_eq!(cache.get_field_display_name("Shot", "sg_status_list"), "Status");
}

#[test]
fn test_persisted_schema_survives_restart() {
    let dir = tempdir().unwrap();
    {
        let cache = SchemaCache::new(config(&dir));
        let mock = MockFetcher::new();
        cache.register_fetcher(mock.clone());
        load_schema(&cache, &mock);
        assert_eq!(cache.get_type_display_name("CustomEntity03"), "Asset Library");
    }

    let cache = SchemaCache::new(config(&dir));
    let mock = MockFetcher::new();
    cache.register_fetcher(mock.clone());

    assert!(cache.load_report().schema_loaded);
    assert_eq!(cache.get_type_display_name("CustomEntity03"), "Asset Library");
    assert_eq!(mock.schema_calls(), 0);
    assert_eq!(cache.snapshot().pending_schema, None);
}

#[test]
fn test_status_name_only() {
    let dir = tempdir().unwrap();
    let cache = SchemaCache::new(config(&dir));
    let mock = MockFetcher::new();
    cache.register_fetcher(mock.clone());

    cache.get_status_display_name("ip", true);
    let id = cache.snapshot().pending_status.unwrap();
    mock.hub
        .complete(id, RequestKind::Find, FetchPayload::Entities(status_records()));
    cache.dispatch_pending();

    assert_eq!(cache.get_status_display_name("ip", true), "In Progress");
    let decorated = cache.get_status_display_name("ip", false);
    assert!(decorated.starts_with("In Progress&nbsp;"));
    assert!(decorated.contains("rgb(202,244,231)"));
    // No colour cached, no marker
    assert_eq!(cache.get_status_display_name("hld", false), "On Hold");
    assert_eq!(cache.get_status_display_name("omt", false), "omt");
}

#[test]
fn test_rapid_lookups_issue_one_fetch() {
    let dir = tempdir().unwrap();
    let cache = SchemaCache::new(config(&dir));
    let mock = MockFetcher::new();
    cache.register_fetcher(mock.clone());

    cache.get_type_display_name("Shot");
    cache.get_field_display_name("Shot", "code");
    cache.get_empty_phrase("Shot", "code");
    cache.get_status_display_name("ip", false);
    cache.get_status_long_name("ip");

    assert_eq!(mock.schema_calls(), 1);
    assert_eq!(mock.entity_calls(), 1);
}

#[test]
fn test_failure_allows_one_retry() {
    let dir = tempdir().unwrap();
    let cache = SchemaCache::new(config(&dir));
    let mock = MockFetcher::new();
    cache.register_fetcher(mock.clone());

    cache.get_type_display_name("Shot");
    let first = cache.snapshot().pending_schema.unwrap();
    mock.hub.fail(first.clone(), "connection reset");
    cache.dispatch_pending();

    let snap = cache.snapshot();
    assert!(!snap.schema_requested);
    assert!(!snap.schema_loaded);

    cache.get_type_display_name("Shot");
    cache.get_type_display_name("Shot");

    let snap = cache.snapshot();
    assert!(snap.schema_requested);
    assert_eq!(mock.schema_calls(), 2);
    assert_ne!(snap.pending_schema, Some(first));
}

#[test]
fn test_unregistered_fetcher_cannot_mutate() {
    let dir = tempdir().unwrap();
    let cache = SchemaCache::new(config(&dir));
    let mock = MockFetcher::new();
    let handle: Arc<dyn Fetcher> = mock.clone();
    cache.register_fetcher(Arc::clone(&handle));

    cache.get_type_display_name("Shot");
    let id = cache.snapshot().pending_schema.unwrap();
    assert!(cache.unregister_fetcher(&handle));

    mock.hub
        .complete(id, RequestKind::Schema, FetchPayload::Schema(shot_schema()));
    assert_eq!(cache.dispatch_pending(), 0);

    assert!(!cache.snapshot().schema_loaded);
    assert_eq!(cache.get_type_display_name("CustomEntity03"), "CustomEntity03");
}

#[test]
fn test_unrelated_request_id_ignored() {
    let dir = tempdir().unwrap();
    let cache = SchemaCache::new(config(&dir));
    let mock = MockFetcher::new();
    cache.register_fetcher(mock.clone());

    cache.get_type_display_name("Shot");
    let before = cache.snapshot();

    mock.hub.complete(
        RequestId::new("someone-else"),
        RequestKind::Schema,
        FetchPayload::Schema(shot_schema()),
    );
    mock.hub.fail(RequestId::new("stale"), "late failure");
    assert_eq!(cache.dispatch_pending(), 2);

    assert_eq!(cache.snapshot(), before);
}

#[test]
fn test_duplicate_completion_ignored() {
    let dir = tempdir().unwrap();
    let cache = SchemaCache::new(config(&dir));
    let mock = MockFetcher::new();
    cache.register_fetcher(mock.clone());

    cache.get_status_long_name("ip");
    let id = cache.snapshot().pending_status.unwrap();
    mock.hub.complete(
        id.clone(),
        RequestKind::Find,
        FetchPayload::Entities(status_records()),
    );
    mock.hub
        .complete(id, RequestKind::Find, FetchPayload::Entities(Vec::new()));
    cache.dispatch_pending();

    assert_eq!(cache.get_status_long_name("ip"), "In Progress");
    assert_eq!(cache.snapshot().status_count, 2);
}

#[test]
fn test_corrupt_cache_file_starts_cold() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir);
    std::fs::write(cfg.schema_path(), b"definitely not bincode").unwrap();
    persist::save_status(&cfg.status_path(), &Default::default()).unwrap();

    let cache = SchemaCache::new(cfg);
    let report = cache.load_report();
    assert!(!report.schema_loaded);
    assert!(report.status_loaded);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].source, "schema");

    let mock = MockFetcher::new();
    cache.register_fetcher(mock.clone());
    cache.get_type_display_name("Shot");
    cache.get_status_long_name("ip");
    assert_eq!(mock.schema_calls(), 1);
    assert_eq!(mock.entity_calls(), 0);
}

#[test]
fn test_no_fetchers_keeps_raw_values() {
    let dir = tempdir().unwrap();
    let cache = SchemaCache::new(config(&dir));

    for _ in 0..3 {
        assert_eq!(cache.get_type_display_name("Shot"), "Shot");
    }
    let snap = cache.snapshot();
    assert!(!snap.schema_requested);
    assert_eq!(snap.pending_schema, None);
}

#[tokio::test]
async fn test_json_export_refresh_end_to_end() {
    let dir = tempdir().unwrap();
    let export = dir.path().join("export.json");
    std::fs::write(
        &export,
        serde_json::to_vec(&json!({
            "schema": {
                "types": {"Shot": {"name": {"value": "Shot"}}, "Sequence": {"name": {"value": "Seq"}}},
                "fields": {"Shot": {"sg_sequence": {"name": {"value": "Sequence"}, "data_type": {"value": "entity"}}}}
            },
            "entities": {"Status": [{"code": "ip", "name": "In Progress", "bg_color": "0,128,0"}]}
        }))
        .unwrap(),
    )
    .unwrap();

    let cache = SchemaCache::new(config(&dir));
    let mut events = cache.events().subscribe();
    let fetcher = Arc::new(JsonExportFetcher::new(&export, tokio::runtime::Handle::current()));
    let mut replies = fetcher.subscribe();
    cache.register_fetcher(fetcher.clone());

    assert_eq!(cache.get_type_display_name("Sequence"), "Sequence");
    assert_eq!(cache.get_status_long_name("ip"), "Undefined");

    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(5), replies.recv())
            .await
            .expect("export fetch timed out")
            .unwrap();
    }
    assert_eq!(cache.dispatch_pending(), 2);

    assert_eq!(cache.get_type_display_name("Sequence"), "Seq");
    assert_eq!(cache.get_field_display_name("Shot", "sg_sequence"), "Sequence");
    assert_eq!(cache.get_status_color("ip").as_deref(), Some("0,128,0"));

    let mut remote_loads = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            CacheEvent::SchemaLoaded {
                source: LoadSource::Remote
            } | CacheEvent::StatusLoaded {
                source: LoadSource::Remote
            }
        ) {
            remote_loads += 1;
        }
    }
    assert_eq!(remote_loads, 2);

    let restarted = SchemaCache::new(config(&dir));
    assert!(restarted.load_report().is_warm());
    assert_eq!(restarted.get_status_long_name("ip"), "In Progress");
}
