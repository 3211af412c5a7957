//! Error types for trackpanel-core
//!
//! Nothing in the lookup API surfaces these to callers. They flow out of the
//! persistence and config helpers, get logged, and are recorded in a
//! [`LoadReport`] so the host can show why the cache started cold.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for trackpanel operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // IO Errors
    // ===================
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine a cache directory for this platform")]
    NoCacheDir,

    // ===================
    // Codec Errors
    // ===================
    #[error("Failed to decode cache file {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("Failed to encode {dataset} cache")]
    Encode {
        dataset: &'static str,
        #[source]
        source: bincode::Error,
    },

    #[error("Cache file {path} has version {found}, expected {expected}")]
    VersionMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    // ===================
    // Input Errors
    // ===================
    #[error("Invalid configuration in {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Failed to parse export {path}")]
    ExportParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Severity level for errors during load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Non-critical, the cache continues cold for that dataset
    Warning,
    /// Significant but not fatal
    Error,
}

/// Individual error entry in load report
#[derive(Debug, Clone)]
pub struct LoadError {
    pub source: String,
    pub message: String,
    pub severity: ErrorSeverity,
}

impl LoadError {
    pub fn warning(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity: ErrorSeverity::Warning,
        }
    }

    /// Build an entry from a [`CoreError`], flattening its source chain
    pub fn from_core_error(source: impl Into<String>, error: &CoreError) -> Self {
        let severity = match error {
            CoreError::VersionMismatch { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        };
        let mut message = error.to_string();
        let mut cause = std::error::Error::source(error);
        while let Some(inner) = cause {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            cause = std::error::Error::source(inner);
        }
        Self {
            source: source.into(),
            message,
            severity,
        }
    }
}

/// Report of what happened while hydrating the cache from disk
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    pub errors: Vec<LoadError>,
    pub schema_loaded: bool,
    pub status_loaded: bool,
}

impl LoadReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: LoadError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.errors.push(LoadError::warning(source, message));
    }

    /// Returns true if there are any errors (including warnings)
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns only warnings
    pub fn warnings(&self) -> impl Iterator<Item = &LoadError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ErrorSeverity::Warning)
    }

    /// True when both datasets came from disk
    pub fn is_warm(&self) -> bool {
        self.schema_loaded && self.status_loaded
    }
}
