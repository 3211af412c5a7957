//! Fetcher backed by a JSON export of the production database
//!
//! Export layout:
//!
//! ```json
//! {
//!   "schema": { "fields": { "Shot": { "code": { "name": {"value": "Shot Code"} } } },
//!               "types":  { "Shot": { "name": {"value": "Shot"} } } },
//!   "entities": { "Status": [ { "code": "ip", "name": "In Progress", "bg_color": "0,0,255" } ] }
//! }
//! ```
//!
//! Every request re-reads the file on tokio's blocking pool, so the export can
//! be regenerated while the panel is running.

use super::{
    EntityRecord, FetchNotification, FetchPayload, Fetcher, Filter, NotificationHub, RequestId,
    RequestKind,
};
use crate::error::CoreError;
use crate::models::SchemaPayload;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

pub struct JsonExportFetcher {
    path: PathBuf,
    runtime: Handle,
    hub: Arc<NotificationHub>,
}

impl JsonExportFetcher {
    pub fn new(path: impl Into<PathBuf>, runtime: Handle) -> Self {
        Self {
            path: path.into(),
            runtime,
            hub: Arc::new(NotificationHub::new("export", CHANNEL_CAPACITY)),
        }
    }

    fn spawn<F>(&self, request_id: RequestId, job: F)
    where
        F: FnOnce(&Value) -> Result<(RequestKind, FetchPayload), String> + Send + 'static,
    {
        let path = self.path.clone();
        let hub = Arc::clone(&self.hub);
        self.runtime.spawn_blocking(move || {
            let result = read_export(&path)
                .map_err(|e| format!("{}: {}", e, error_chain(&e)))
                .and_then(|root| job(&root));
            match result {
                Ok((kind, payload)) => {
                    debug!(%request_id, path = %path.display(), "Export request completed");
                    hub.complete(request_id, kind, payload);
                }
                Err(message) => {
                    warn!(%request_id, path = %path.display(), %message, "Export request failed");
                    hub.fail(request_id, message);
                }
            }
        });
    }
}

impl Fetcher for JsonExportFetcher {
    fn fetch_schema(&self, project_id: i64) -> RequestId {
        let request_id = self.hub.next_request_id();
        debug!(%request_id, project_id, "Reading schema from export");
        self.spawn(request_id.clone(), |root| {
            let schema = root
                .get("schema")
                .ok_or_else(|| "export has no schema section".to_string())?;
            Ok((
                RequestKind::Schema,
                FetchPayload::Schema(SchemaPayload::from_json(schema)),
            ))
        });
        request_id
    }

    fn fetch_entities(&self, entity_type: &str, filters: &[Filter], fields: &[&str]) -> RequestId {
        let request_id = self.hub.next_request_id();
        debug!(%request_id, entity_type, "Reading entities from export");

        let entity_type = entity_type.to_string();
        let filters = filters.to_vec();
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();

        self.spawn(request_id.clone(), move |root| {
            let records = root
                .get("entities")
                .and_then(|e| e.get(&entity_type))
                .and_then(Value::as_array)
                .ok_or_else(|| format!("export has no entities of type {}", entity_type))?;

            let found = records
                .iter()
                .filter_map(Value::as_object)
                .filter(|r| filters.iter().all(|f| f.matches(r)))
                .map(|r| project(r, &entity_type, &fields))
                .collect();

            Ok((RequestKind::Find, FetchPayload::Entities(found)))
        });
        request_id
    }

    fn subscribe(&self) -> broadcast::Receiver<FetchNotification> {
        self.hub.subscribe()
    }
}

fn read_export(path: &Path) -> Result<Value, CoreError> {
    let bytes = std::fs::read(path).map_err(|source| CoreError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CoreError::ExportParse {
        path: path.to_path_buf(),
        source,
    })
}

fn error_chain(err: &CoreError) -> String {
    std::error::Error::source(err)
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// Keep only the requested fields, plus `type` and `id` like a live query
fn project(record: &EntityRecord, entity_type: &str, fields: &[String]) -> EntityRecord {
    let mut out = EntityRecord::new();
    out.insert("type".into(), Value::String(entity_type.to_string()));
    if let Some(id) = record.get("id") {
        out.insert("id".into(), id.clone());
    }
    for field in fields {
        out.insert(
            field.clone(),
            record.get(field).cloned().unwrap_or(Value::Null),
        );
    }
    out
}
