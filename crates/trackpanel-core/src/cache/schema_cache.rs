//! Schema and status metadata cache
//!
//! Display-name lookups answer from memory and never block. When a dataset
//! has never been loaded (neither from disk nor from a fetch) and no request
//! is in flight, a lookup hands a request to one of the registered fetchers
//! and returns the raw fallback. The reply is applied when the host calls
//! [`SchemaCache::dispatch_pending`], after which lookups return display names.
//!
//! Per dataset:
//! - `requested` guards against duplicate fetches; a failure clears it so the
//!   next lookup retries, a success leaves it set for the instance lifetime
//! - `loaded` never goes back to false
//! - replies are matched on the issuing fetcher and its request id; anything
//!   else is ignored

use super::persist;
use crate::config::CacheConfig;
use crate::error::{LoadError, LoadReport};
use crate::event::{CacheEvent, CacheEventBus, Dataset, LoadSource};
use crate::fetcher::{
    EntityRecord, FetchNotification, FetchPayload, Fetcher, FetcherId, RequestId,
};
use crate::models::status::STATUS_FIELDS;
use crate::models::{
    FieldDescriptor, FieldSchema, SchemaPayload, StatusDescriptor, StatusTable, TypeSchema,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// Label for the pseudo-field `type`, which the schema never describes
pub const TYPE_FIELD_LABEL: &str = "Type";

/// Placeholder shown for empty field values
pub const EMPTY_PHRASE: &str = "Not set";

/// Long name reported for unknown status codes
pub const UNDEFINED_STATUS: &str = "Undefined";

/// Entity type queried for the status list
pub const STATUS_ENTITY_TYPE: &str = "Status";

/// Request the cache is waiting on, and the fetcher it was issued to
#[derive(Debug, Clone)]
struct PendingRequest {
    fetcher: FetcherId,
    request_id: RequestId,
}

#[derive(Debug, Default, Clone)]
struct DatasetState {
    loaded: bool,
    requested: bool,
    /// Set while the fetch call runs outside the lock
    issuing: bool,
    pending: Option<PendingRequest>,
}

struct Registration {
    fetcher: Arc<dyn Fetcher>,
    receiver: broadcast::Receiver<FetchNotification>,
}

#[derive(Default)]
struct CacheState {
    field_schema: FieldSchema,
    type_schema: TypeSchema,
    status_table: StatusTable,
    schema: DatasetState,
    status: DatasetState,
    fetchers: BTreeMap<FetcherId, Registration>,
}

impl CacheState {
    fn dataset(&self, dataset: Dataset) -> &DatasetState {
        match dataset {
            Dataset::Schema => &self.schema,
            Dataset::Status => &self.status,
        }
    }

    fn dataset_mut(&mut self, dataset: Dataset) -> &mut DatasetState {
        match dataset {
            Dataset::Schema => &mut self.schema,
            Dataset::Status => &mut self.status,
        }
    }

    /// Which dataset, if any, is waiting for this reply from `source`
    fn waiting_on(&self, source: FetcherId, request_id: &RequestId) -> Option<Dataset> {
        [Dataset::Schema, Dataset::Status]
            .into_iter()
            .find(|&dataset| {
                self.dataset(dataset)
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.fetcher == source && &p.request_id == request_id)
            })
    }

    fn issuing(&self) -> bool {
        self.schema.issuing || self.status.issuing
    }

    fn field(&self, entity_type: &str, field_name: &str) -> Option<&FieldDescriptor> {
        if !self.type_schema.contains_key(entity_type) {
            return None;
        }
        self.field_schema.get(entity_type)?.get(field_name)
    }
}

/// Read-only view of the cache state, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub schema_loaded: bool,
    pub schema_requested: bool,
    pub status_loaded: bool,
    pub status_requested: bool,
    pub pending_schema: Option<RequestId>,
    pub pending_status: Option<RequestId>,
    pub type_count: usize,
    pub field_count: usize,
    pub status_count: usize,
    pub fetcher_count: usize,
}

/// Display-name lookup service for entity types, fields and status codes
pub struct SchemaCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
    events: CacheEventBus,
    load_report: LoadReport,
}

impl SchemaCache {
    /// Create a cache and hydrate it from the files in `config.cache_dir`
    pub fn new(config: CacheConfig) -> Self {
        let events = CacheEventBus::new(config.event_capacity);
        Self::with_events(config, events)
    }

    /// Like [`SchemaCache::new`] but publishing on an existing bus, so
    /// subscribers also see the disk hydration events
    pub fn with_events(config: CacheConfig, events: CacheEventBus) -> Self {
        let mut state = CacheState::default();
        let mut report = LoadReport::new();

        let schema_path = config.schema_path();
        match persist::load_schema(&schema_path) {
            Ok(Some(blob)) => {
                debug!(path = %schema_path.display(), saved_at = %blob.saved_at, "Loaded cached schema");
                state.field_schema = blob.field_schema;
                state.type_schema = blob.type_schema;
                state.schema.loaded = true;
                report.schema_loaded = true;
                events.publish(CacheEvent::SchemaLoaded {
                    source: LoadSource::Disk,
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %schema_path.display(), error = %e, "Could not open cached schema");
                report.add_error(LoadError::from_core_error("schema", &e));
            }
        }

        let status_path = config.status_path();
        match persist::load_status(&status_path) {
            Ok(Some(blob)) => {
                debug!(path = %status_path.display(), saved_at = %blob.saved_at, "Loaded cached status");
                state.status_table = blob.statuses;
                state.status.loaded = true;
                report.status_loaded = true;
                events.publish(CacheEvent::StatusLoaded {
                    source: LoadSource::Disk,
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %status_path.display(), error = %e, "Could not open cached status");
                report.add_error(LoadError::from_core_error("status", &e));
            }
        }

        info!(
            cache_dir = %config.cache_dir.display(),
            schema_loaded = report.schema_loaded,
            status_loaded = report.status_loaded,
            "Metadata cache initialized"
        );

        Self {
            config,
            state: Mutex::new(state),
            events,
            load_report: report,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Bus announcing loads and fetch outcomes
    pub fn events(&self) -> &CacheEventBus {
        &self.events
    }

    /// What happened while reading the cache files at construction
    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    // ===================
    // Fetcher registration
    // ===================

    /// Register a fetcher and start listening to its notifications.
    /// Registering the same fetcher again replaces the earlier registration.
    pub fn register_fetcher(&self, fetcher: Arc<dyn Fetcher>) {
        let id = FetcherId::of(&fetcher);
        let receiver = fetcher.subscribe();
        let mut state = self.state.lock();
        if state
            .fetchers
            .insert(id, Registration { fetcher, receiver })
            .is_some()
        {
            debug!(?id, "Fetcher re-registered, subscription replaced");
        } else {
            debug!(?id, "Fetcher registered with metadata cache");
        }
    }

    /// Stop listening to a fetcher. Returns false (and logs) if it was
    /// never registered.
    pub fn unregister_fetcher(&self, fetcher: &Arc<dyn Fetcher>) -> bool {
        let id = FetcherId::of(fetcher);
        let removed = self.state.lock().fetchers.remove(&id).is_some();
        if removed {
            debug!(?id, "Fetcher unregistered from metadata cache");
        } else {
            warn!(?id, "Could not unregister unknown fetcher");
        }
        removed
    }

    // ===================
    // Lookups
    // ===================

    /// Display name of an entity type, or the type itself if unknown
    pub fn get_type_display_name(&self, entity_type: &str) -> String {
        self.check_refresh(Dataset::Schema);
        let state = self.state.lock();
        state
            .type_schema
            .get(entity_type)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| entity_type.to_string())
    }

    /// Display name of a field, or the field name itself if unknown
    pub fn get_field_display_name(&self, entity_type: &str, field_name: &str) -> String {
        self.check_refresh(Dataset::Schema);
        let state = self.state.lock();
        if field_name == "type" {
            return TYPE_FIELD_LABEL.to_string();
        }
        state
            .field(entity_type, field_name)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| field_name.to_string())
    }

    /// Data type of a field if cached
    pub fn get_field_data_type(&self, entity_type: &str, field_name: &str) -> Option<String> {
        self.check_refresh(Dataset::Schema);
        let state = self.state.lock();
        state
            .field(entity_type, field_name)
            .map(|f| f.data_type.clone())
    }

    /// Placeholder for an empty field value.
    ///
    /// Every data type currently shares [`EMPTY_PHRASE`]; the lookup still
    /// primes the schema so a per-type phrase can be added here.
    pub fn get_empty_phrase(&self, _entity_type: &str, _field_name: &str) -> String {
        self.check_refresh(Dataset::Schema);
        EMPTY_PHRASE.to_string()
    }

    /// Long status name, optionally followed by an HTML colour swatch.
    ///
    /// Unknown codes come back unchanged. The swatch is only appended when a
    /// background colour is cached and `name_only` is false.
    pub fn get_status_display_name(&self, status_code: &str, name_only: bool) -> String {
        self.check_refresh(Dataset::Status);
        let state = self.state.lock();

        let Some(status) = state.status_table.get(status_code) else {
            return status_code.to_string();
        };
        let name = status.long_name().unwrap_or(status_code);
        match status.bg_color.as_deref() {
            Some(color) if !name_only => format!(
                "{}&nbsp;<span style='color: rgb({})'>&#9608;</span>",
                name, color
            ),
            _ => name.to_string(),
        }
    }

    /// Background colour of a status as "R,G,B"
    pub fn get_status_color(&self, status_code: &str) -> Option<String> {
        self.check_refresh(Dataset::Status);
        let state = self.state.lock();
        state
            .status_table
            .get(status_code)
            .and_then(|s| s.bg_color.clone())
    }

    /// Long status name, or "Undefined"
    pub fn get_status_long_name(&self, status_code: &str) -> String {
        self.check_refresh(Dataset::Status);
        let state = self.state.lock();
        state
            .status_table
            .get(status_code)
            .and_then(StatusDescriptor::long_name)
            .unwrap_or(UNDEFINED_STATUS)
            .to_string()
    }

    /// Resource path of the status icon
    pub fn get_status_icon_resource(&self, status_code: &str) -> Option<String> {
        self.check_refresh(Dataset::Status);
        let state = self.state.lock();
        state
            .status_table
            .get(status_code)
            .and_then(|s| s.icon_key.as_deref())
            .map(|key| format!(":/trackpanel/{}.png", key))
    }

    /// Cached entity types, sorted. Does not trigger a fetch.
    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.state.lock().type_schema.keys().cloned().collect();
        types.sort();
        types
    }

    /// Cached field names of an entity type, sorted. Does not trigger a fetch.
    pub fn field_names(&self, entity_type: &str) -> Vec<String> {
        let mut fields: Vec<String> = self
            .state
            .lock()
            .field_schema
            .get(entity_type)
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        fields.sort();
        fields
    }

    /// Cached status codes, sorted. Does not trigger a fetch.
    pub fn status_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.state.lock().status_table.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let state = self.state.lock();
        CacheSnapshot {
            schema_loaded: state.schema.loaded,
            schema_requested: state.schema.requested,
            status_loaded: state.status.loaded,
            status_requested: state.status.requested,
            pending_schema: state.schema.pending.as_ref().map(|p| p.request_id.clone()),
            pending_status: state.status.pending.as_ref().map(|p| p.request_id.clone()),
            type_count: state.type_schema.len(),
            field_count: state.field_schema.values().map(|f| f.len()).sum(),
            status_count: state.status_table.len(),
            fetcher_count: state.fetchers.len(),
        }
    }

    // ===================
    // Notification delivery
    // ===================

    /// Apply every notification queued on registered fetchers.
    ///
    /// Call from the thread that owns the UI; returns the number of
    /// notifications handled (matched or not). A fetcher whose receiver
    /// lagged may have dropped the reply the cache waits for, so a request
    /// still pending on it afterwards is failed and the next lookup retries.
    pub fn dispatch_pending(&self) -> usize {
        let mut state = self.state.lock();
        if state.issuing() {
            // Replies stay queued until the request id is recorded
            return 0;
        }

        let mut inbox = Vec::new();
        let mut lagged = Vec::new();
        for (&id, registration) in state.fetchers.iter_mut() {
            loop {
                match registration.receiver.try_recv() {
                    Ok(notification) => inbox.push((id, notification)),
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(?id, skipped, "Fetcher notifications dropped, receiver lagged");
                        lagged.push(id);
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }

        let handled = inbox.len();
        for (source, notification) in inbox {
            self.apply(&mut state, source, notification);
        }

        for source in lagged {
            for dataset in [Dataset::Schema, Dataset::Status] {
                let stalled = state
                    .dataset(dataset)
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.fetcher == source);
                if stalled {
                    self.fail(&mut state, dataset, "reply lost on a lagged receiver".to_string());
                }
            }
        }
        handled
    }

    /// Apply a single notification delivered by the host on behalf of `source`
    pub fn handle_notification(&self, source: &Arc<dyn Fetcher>, notification: FetchNotification) {
        let mut state = self.state.lock();
        self.apply(&mut state, FetcherId::of(source), notification);
    }

    // ===================
    // Internals
    // ===================

    fn check_refresh(&self, dataset: Dataset) {
        let (fetcher_id, fetcher) = {
            let mut state = self.state.lock();
            let current = state.dataset(dataset);
            if current.loaded || current.requested {
                return;
            }

            let Some((&id, registration)) = state.fetchers.iter().next() else {
                warn!(
                    dataset = dataset.as_str(),
                    "No fetchers registered with metadata cache, cannot load data"
                );
                return;
            };
            let fetcher = Arc::clone(&registration.fetcher);

            let current = state.dataset_mut(dataset);
            current.requested = true;
            current.issuing = true;
            (id, fetcher)
        };

        // Lock released so the fetcher may call back into the cache
        let request_id = match dataset {
            Dataset::Schema => {
                debug!(project_id = self.config.project_id, "Requesting schema");
                fetcher.fetch_schema(self.config.project_id)
            }
            Dataset::Status => {
                debug!("Requesting status list");
                fetcher.fetch_entities(STATUS_ENTITY_TYPE, &[], &STATUS_FIELDS)
            }
        };

        {
            let mut state = self.state.lock();
            let current = state.dataset_mut(dataset);
            current.issuing = false;
            current.pending = Some(PendingRequest {
                fetcher: fetcher_id,
                request_id: request_id.clone(),
            });
        }

        self.events.publish(CacheEvent::FetchIssued {
            dataset,
            request_id,
        });
    }

    fn apply(&self, state: &mut CacheState, source: FetcherId, notification: FetchNotification) {
        let Some(dataset) = state.waiting_on(source, notification.request_id()) else {
            debug!(?source, request_id = %notification.request_id(), "Ignoring unrelated notification");
            return;
        };

        match notification {
            FetchNotification::Failed { message, .. } => {
                self.fail(state, dataset, message);
            }
            FetchNotification::Completed { payload, .. } => match (dataset, payload) {
                (Dataset::Schema, FetchPayload::Schema(schema)) => {
                    self.store_schema(state, schema);
                }
                (Dataset::Status, FetchPayload::Entities(records)) => {
                    self.store_status(state, records);
                }
                (_, _) => {
                    self.fail(state, dataset, "reply carried an unexpected payload".to_string());
                }
            },
        }
    }

    fn fail(&self, state: &mut CacheState, dataset: Dataset, message: String) {
        warn!(dataset = dataset.as_str(), %message, "Could not load metadata");
        let current = state.dataset_mut(dataset);
        current.requested = false;
        current.pending = None;
        self.events
            .publish(CacheEvent::FetchFailed { dataset, message });
    }

    fn store_schema(&self, state: &mut CacheState, schema: SchemaPayload) {
        info!(types = schema.types.len(), "Schema arrived");
        state.field_schema = schema.fields;
        state.type_schema = schema.types;
        state.schema = DatasetState {
            loaded: true,
            requested: true,
            issuing: false,
            pending: None,
        };

        let path = self.config.schema_path();
        if let Err(e) = persist::save_schema(&path, &state.field_schema, &state.type_schema) {
            warn!(path = %path.display(), error = %e, "Could not write schema file");
        }

        self.events.publish(CacheEvent::SchemaLoaded {
            source: LoadSource::Remote,
        });
    }

    fn store_status(&self, state: &mut CacheState, records: Vec<EntityRecord>) {
        let mut table = StatusTable::with_capacity(records.len());
        for record in &records {
            match StatusDescriptor::from_record(record) {
                Some(status) => {
                    table.insert(status.code.clone(), status);
                }
                None => warn!(?record, "Skipping status record without a code"),
            }
        }
        info!(statuses = table.len(), "Status list arrived");

        state.status_table = table;
        state.status = DatasetState {
            loaded: true,
            requested: true,
            issuing: false,
            pending: None,
        };

        let path = self.config.status_path();
        if let Err(e) = persist::save_status(&path, &state.status_table) {
            warn!(path = %path.display(), error = %e, "Could not write status file");
        }

        self.events.publish(CacheEvent::StatusLoaded {
            source: LoadSource::Remote,
        });
    }
}
