//! Data models for trackpanel

pub mod schema;
pub mod status;

pub use schema::{FieldDescriptor, FieldSchema, SchemaPayload, TypeDescriptor, TypeSchema};
pub use status::{StatusDescriptor, StatusTable};
