//! Fetch collaborator contract
//!
//! A [`Fetcher`] queries the remote production database on its own thread
//! or task and reports back through a broadcast channel. Every request gets
//! an opaque [`RequestId`]; the cache matches replies against the ids it is
//! waiting for and ignores everything else.

pub mod json_export;

use crate::models::SchemaPayload;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub use json_export::JsonExportFetcher;

/// Raw entity record as returned by a find query
pub type EntityRecord = Map<String, Value>;

/// Opaque identifier handed out when a request is issued
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of request a completion answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Schema,
    Find,
}

/// Comparison used by [`Filter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Is,
    IsNot,
}

/// A single `field <op> value` condition of a find query
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn is(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Is,
            value: value.into(),
        }
    }

    pub fn is_not(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::IsNot,
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &EntityRecord) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Is => *actual == self.value,
            FilterOp::IsNot => *actual != self.value,
        }
    }
}

/// Data carried by a completion
#[derive(Debug, Clone)]
pub enum FetchPayload {
    Schema(SchemaPayload),
    Entities(Vec<EntityRecord>),
}

/// Notification published by a fetcher when a request finishes
#[derive(Debug, Clone)]
pub enum FetchNotification {
    Completed {
        request_id: RequestId,
        kind: RequestKind,
        payload: FetchPayload,
    },
    Failed {
        request_id: RequestId,
        message: String,
    },
}

impl FetchNotification {
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Completed { request_id, .. } | Self::Failed { request_id, .. } => request_id,
        }
    }
}

/// Asynchronous query worker for the remote production database
///
/// Both fetch methods must return immediately; results arrive later on the
/// receivers handed out by [`Fetcher::subscribe`]. The cache calls them
/// without holding its lock, so an implementation may look things up in the
/// cache from inside a fetch call.
pub trait Fetcher: Send + Sync {
    /// Request the full entity/field schema for a project
    fn fetch_schema(&self, project_id: i64) -> RequestId;

    /// Request all records of `entity_type` matching `filters`
    fn fetch_entities(&self, entity_type: &str, filters: &[Filter], fields: &[&str]) -> RequestId;

    /// Receive completion and failure notifications
    fn subscribe(&self) -> broadcast::Receiver<FetchNotification>;
}

/// Identity of a registered fetcher (address of its shared allocation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetcherId(usize);

impl FetcherId {
    pub fn of(fetcher: &Arc<dyn Fetcher>) -> Self {
        Self(Arc::as_ptr(fetcher) as *const () as usize)
    }
}

/// Shared by every hub so ids never repeat within the process
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Request-id allocation and notification fan-out shared by fetcher impls
pub struct NotificationHub {
    prefix: String,
    sender: broadcast::Sender<FetchNotification>,
}

impl NotificationHub {
    pub fn new(prefix: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            prefix: prefix.into(),
            sender,
        }
    }

    pub fn next_request_id(&self) -> RequestId {
        let n = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        RequestId::new(format!("{}-{}", self.prefix, n))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FetchNotification> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notification: FetchNotification) {
        // No subscribers is fine: nobody is waiting for this reply
        let _ = self.sender.send(notification);
    }

    pub fn complete(&self, request_id: RequestId, kind: RequestKind, payload: FetchPayload) {
        self.publish(FetchNotification::Completed {
            request_id,
            kind,
            payload,
        });
    }

    pub fn fail(&self, request_id: RequestId, message: impl Into<String>) {
        self.publish(FetchNotification::Failed {
            request_id,
            message: message.into(),
        });
    }
}
