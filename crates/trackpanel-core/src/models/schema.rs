//! Entity and field schema models
//!
//! The remote schema endpoint describes every attribute as an object with a
//! `value` key (`{"name": {"value": "Shot"}, "data_type": {"value": "entity"}}`).
//! Descriptors keep the two attributes the panel reads as typed fields and
//! flatten everything else into `properties`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Field name → descriptor, per entity type
pub type FieldSchema = HashMap<String, HashMap<String, FieldDescriptor>>;

/// Entity type → descriptor
pub type TypeSchema = HashMap<String, TypeDescriptor>;

/// Metadata for a single field of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Display name (e.g. "Status" for `sg_status_list`)
    pub name: String,

    /// Data type category (e.g. "entity", "text", "status_list")
    pub data_type: String,

    /// Remaining scalar attributes, stringified
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Build from a raw schema object; `None` when it carries no display name
    pub fn from_schema_value(raw: &Map<String, Value>) -> Option<Self> {
        let name = attribute(raw, "name")?;
        let data_type = attribute(raw, "data_type").unwrap_or_default();
        Some(Self {
            name,
            data_type,
            properties: remaining_properties(raw, &["name", "data_type"]),
        })
    }
}

/// Metadata for an entity type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Display name (e.g. "Asset Library" for `CustomEntity03`)
    pub name: String,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn from_schema_value(raw: &Map<String, Value>) -> Option<Self> {
        let name = attribute(raw, "name")?;
        Some(Self {
            name,
            properties: remaining_properties(raw, &["name"]),
        })
    }
}

/// Result of a schema fetch: both halves always arrive together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaPayload {
    pub fields: FieldSchema,
    pub types: TypeSchema,
}

impl SchemaPayload {
    /// Parse the `{ "fields": {type: {field: {...}}}, "types": {type: {...}} }`
    /// shape returned by the schema endpoint. Entries without a display name
    /// are dropped.
    pub fn from_json(raw: &Value) -> Self {
        let mut payload = Self::default();

        if let Some(types) = raw.get("types").and_then(Value::as_object) {
            for (entity_type, desc) in types {
                if let Some(desc) = desc.as_object().and_then(TypeDescriptor::from_schema_value) {
                    payload.types.insert(entity_type.clone(), desc);
                }
            }
        }

        if let Some(fields) = raw.get("fields").and_then(Value::as_object) {
            for (entity_type, entity_fields) in fields {
                let Some(entity_fields) = entity_fields.as_object() else {
                    continue;
                };
                let parsed = entity_fields
                    .iter()
                    .filter_map(|(field, desc)| {
                        desc.as_object()
                            .and_then(FieldDescriptor::from_schema_value)
                            .map(|d| (field.clone(), d))
                    })
                    .collect();
                payload.fields.insert(entity_type.clone(), parsed);
            }
        }

        payload
    }
}

/// Read an attribute in either `{"value": x}` or bare scalar form
fn attribute(raw: &Map<String, Value>, key: &str) -> Option<String> {
    let value = raw.get(key)?;
    let value = value.get("value").unwrap_or(value);
    scalar_to_string(value)
}

fn remaining_properties(raw: &Map<String, Value>, skip: &[&str]) -> BTreeMap<String, String> {
    raw.iter()
        .filter(|(k, _)| !skip.contains(&k.as_str()))
        .filter_map(|(k, v)| {
            let v = v.get("value").unwrap_or(v);
            scalar_to_string(v).map(|s| (k.clone(), s))
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
