//! trackpanel-core - Core library for trackpanel
//!
//! Caches entity/field schema and status-code metadata from a production
//! database so a tracking panel can show display names without waiting on
//! the network.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod models;

pub use cache::{CacheSnapshot, SchemaCache};
pub use config::CacheConfig;
pub use error::{CoreError, LoadReport};
pub use event::{CacheEvent, CacheEventBus, Dataset, LoadSource};
pub use fetcher::{FetchNotification, FetchPayload, Fetcher, JsonExportFetcher, RequestId};
