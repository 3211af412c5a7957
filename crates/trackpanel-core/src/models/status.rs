//! Status code models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Status code → descriptor
pub type StatusTable = HashMap<String, StatusDescriptor>;

/// Record field holding the status icon's resource key
pub const ICON_KEY_FIELD: &str = "icon.Icon.image_map_key";

/// Fields requested when downloading the status list
pub const STATUS_FIELDS: [&str; 4] = ["bg_color", "code", "name", ICON_KEY_FIELD];

/// A task/version lifecycle state such as `ip` = "In Progress"
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusDescriptor {
    /// Short code (e.g. "ip")
    pub code: String,

    /// Long name (e.g. "In Progress"); may be missing or empty upstream
    pub name: Option<String>,

    /// Background colour as "R,G,B"
    pub bg_color: Option<String>,

    /// Icon resource key
    pub icon_key: Option<String>,
}

impl StatusDescriptor {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: Some(name.into()),
            bg_color: None,
            icon_key: None,
        }
    }

    /// Build from an entity record; `None` when the record has no code
    pub fn from_record(record: &Map<String, Value>) -> Option<Self> {
        let code = non_empty_str(record.get("code"))?;
        Some(Self {
            code,
            name: non_empty_str(record.get("name")),
            bg_color: non_empty_str(record.get("bg_color")),
            icon_key: non_empty_str(record.get(ICON_KEY_FIELD)),
        })
    }

    /// Long name if present and non-empty
    pub fn long_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_record() {
        let record = json!({
            "type": "Status",
            "id": 12,
            "code": "ip",
            "name": "In Progress",
            "bg_color": "202,244,231",
            "icon.Icon.image_map_key": "icon_ip",
        });
        let status = StatusDescriptor::from_record(record.as_object().unwrap()).unwrap();

        assert_eq!(status.code, "ip");
        assert_eq!(status.long_name(), Some("In Progress"));
        assert_eq!(status.bg_color.as_deref(), Some("202,244,231"));
        assert_eq!(status.icon_key.as_deref(), Some("icon_ip"));
    }

    #[test]
    fn test_record_without_code_is_rejected() {
        let record = json!({"name": "Orphan", "bg_color": "0,0,0"});
        assert!(StatusDescriptor::from_record(record.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_empty_name_has_no_long_name() {
        let record = json!({"code": "wtg", "name": "", "bg_color": null});
        let status = StatusDescriptor::from_record(record.as_object().unwrap()).unwrap();
        assert_eq!(status.long_name(), None);
        assert_eq!(status.bg_color, None);
    }
}
