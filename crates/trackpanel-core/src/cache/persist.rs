//! On-disk persistence for the metadata cache
//!
//! Each dataset lives in its own bincode blob. The first field of every blob
//! is [`CACHE_VERSION`], read on its own before the body so a layout change
//! reads as a version mismatch rather than garbage.
//!
//! Version History:
//! - v1: field/type schema + status table with name and colour
//! - v2: status icon key, `saved_at` timestamp

use crate::error::CoreError;
use crate::models::{FieldSchema, StatusTable, TypeSchema};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Current on-disk format version
///
/// Bump whenever a persisted model changes shape.
pub const CACHE_VERSION: u32 = 2;

/// Schema blob as read back from disk
#[derive(Debug, Clone, Deserialize)]
pub struct PersistedSchema {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub field_schema: FieldSchema,
    pub type_schema: TypeSchema,
}

/// Status blob as read back from disk
#[derive(Debug, Clone, Deserialize)]
pub struct PersistedStatus {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub statuses: StatusTable,
}

#[derive(Serialize)]
struct SchemaBlob<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    field_schema: &'a FieldSchema,
    type_schema: &'a TypeSchema,
}

#[derive(Serialize)]
struct StatusBlob<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    statuses: &'a StatusTable,
}

/// Load the schema blob; `Ok(None)` when no file exists yet
pub fn load_schema(path: &Path) -> Result<Option<PersistedSchema>, CoreError> {
    read_blob(path)
}

/// Load the status blob; `Ok(None)` when no file exists yet
pub fn load_status(path: &Path) -> Result<Option<PersistedStatus>, CoreError> {
    read_blob(path)
}

/// Overwrite the schema blob
pub fn save_schema(
    path: &Path,
    field_schema: &FieldSchema,
    type_schema: &TypeSchema,
) -> Result<(), CoreError> {
    let blob = SchemaBlob {
        version: CACHE_VERSION,
        saved_at: Utc::now(),
        field_schema,
        type_schema,
    };
    write_blob(path, "schema", &blob)
}

/// Overwrite the status blob
pub fn save_status(path: &Path, statuses: &StatusTable) -> Result<(), CoreError> {
    let blob = StatusBlob {
        version: CACHE_VERSION,
        saved_at: Utc::now(),
        statuses,
    };
    write_blob(path, "status", &blob)
}

/// Delete the given cache files, returning how many existed
pub fn clear(paths: &[&Path]) -> Result<usize, CoreError> {
    let mut removed = 0;
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Cache file removed");
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(CoreError::FileWrite {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
    Ok(removed)
}

fn read_blob<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No cache file");
            return Ok(None);
        }
        Err(source) => {
            return Err(CoreError::FileRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let version: u32 = bincode::deserialize(&bytes).map_err(|source| CoreError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    if version != CACHE_VERSION {
        return Err(CoreError::VersionMismatch {
            path: path.to_path_buf(),
            found: version,
            expected: CACHE_VERSION,
        });
    }

    let value = bincode::deserialize(&bytes).map_err(|source| CoreError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), bytes = bytes.len(), "Cache file decoded");
    Ok(Some(value))
}

fn write_blob<T: Serialize>(path: &Path, dataset: &'static str, value: &T) -> Result<(), CoreError> {
    let data = bincode::serialize(value).map_err(|source| CoreError::Encode { dataset, source })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CoreError::FileWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    std::fs::write(path, &data).map_err(|source| CoreError::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(path = %path.display(), bytes = data.len(), dataset, "Cache file written");
    Ok(())
}
