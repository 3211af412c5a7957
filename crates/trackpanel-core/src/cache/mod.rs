//! Caching layer for trackpanel-core
//!
//! In-memory schema/status lookups with bincode-backed warm start.

pub mod persist;
pub mod schema_cache;

pub use schema_cache::{
    CacheSnapshot, SchemaCache, EMPTY_PHRASE, TYPE_FIELD_LABEL, UNDEFINED_STATUS,
};
