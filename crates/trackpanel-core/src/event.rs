//! Event bus for trackpanel using tokio::broadcast
//!
//! Lets the UI redraw once metadata arrives instead of polling the cache.

use crate::fetcher::RequestId;
use tokio::sync::broadcast;

/// Which of the two cached datasets an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Schema,
    Status,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Schema => "schema",
            Dataset::Status => "status",
        }
    }
}

/// Where loaded data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Disk,
    Remote,
}

/// Events emitted by the metadata cache
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// Entity/field schema became available
    SchemaLoaded { source: LoadSource },
    /// Status table became available
    StatusLoaded { source: LoadSource },
    /// A refresh request was handed to a fetcher
    FetchIssued {
        dataset: Dataset,
        request_id: RequestId,
    },
    /// A refresh request failed; a later lookup will retry
    FetchFailed { dataset: Dataset, message: String },
}

/// Event bus for broadcasting cache events
pub struct CacheEventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl CacheEventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (64 events)
    pub fn default_capacity() -> Self {
        Self::new(64)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: CacheEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }
}

impl Default for CacheEventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}

impl Clone for CacheEventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
