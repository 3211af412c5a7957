//! Cache configuration
//!
//! Defaults work out of the box; an optional TOML file can override any key:
//!
//! ```toml
//! cache_dir = "/studio/cache/trackpanel"
//! project_id = 122
//! ```

use crate::error::CoreError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Configuration for [`crate::SchemaCache`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the persisted cache files
    pub cache_dir: PathBuf,

    /// Project whose schema is fetched
    pub project_id: i64,

    /// File name of the persisted schema blob
    pub schema_file: String,

    /// File name of the persisted status blob
    pub status_file: String,

    /// Capacity of the cache event channel
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir()
                .unwrap_or_else(|_| std::env::temp_dir().join("trackpanel")),
            project_id: 0,
            schema_file: "schema.bin".to_string(),
            status_file: "status.bin".to_string(),
            event_capacity: 64,
        }
    }
}

/// Platform cache directory for trackpanel (`~/.cache/trackpanel` on Linux)
pub fn default_cache_dir() -> Result<PathBuf, CoreError> {
    dirs::cache_dir()
        .map(|d| d.join("trackpanel"))
        .ok_or(CoreError::NoCacheDir)
}

impl CacheConfig {
    /// Defaults rooted at a specific cache directory
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_project_id(mut self, project_id: i64) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn schema_path(&self) -> PathBuf {
        self.cache_dir.join(&self.schema_file)
    }

    pub fn status_path(&self) -> PathBuf {
        self.cache_dir.join(&self.status_file)
    }

    /// Parse a TOML config file
    pub fn try_load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| CoreError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load a TOML config file, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(CoreError::FileRead { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring invalid config, using defaults");
                Self::default()
            }
        }
    }
}
