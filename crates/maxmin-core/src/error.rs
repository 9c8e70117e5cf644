//! Core error types for maxmin-core.
//!
//! The tracking engine itself never fails: bad readings are dropped and bad
//! restore records are discarded. These errors belong to the layers around
//! it (configuration, persistence, observers).

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for maxmin-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Could not resolve the data directory
    #[error("Cannot resolve data directory: {0}")]
    DataDir(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Unknown period name
    #[error("Unknown period '{0}' (expected daily, weekly, monthly, yearly or all_time)")]
    UnknownPeriod(String),

    /// Unknown field name
    #[error("Unknown field '{0}'")]
    UnknownField(String),
}

/// Failure reported by an engine observer.
#[derive(Error, Debug)]
#[error("Observer '{observer}' failed: {message}")]
pub struct ObserverError {
    pub observer: String,
    pub message: String,
}

impl ObserverError {
    pub fn new(observer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            observer: observer.into(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodKind;

    fn parse_period(name: &str) -> Result<PeriodKind> {
        Ok(name.parse::<PeriodKind>()?)
    }

    fn read_config(path: &std::path::Path) -> Result<String> {
        Ok(std::fs::read_to_string(path)?)
    }

    #[test]
    fn layer_errors_convert_into_core_error() {
        let err = parse_period("hourly").unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::UnknownPeriod(_))));
        assert!(err.to_string().starts_with("Validation error: Unknown period 'hourly'"));

        let dir = tempfile::tempdir().unwrap();
        let err = read_config(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));

        let err: CoreError = serde_json::from_str::<f64>("nope").unwrap_err().into();
        assert!(err.to_string().starts_with("JSON error:"));

        let err: CoreError = ConfigError::UnknownKey("nope".into()).into();
        assert_eq!(err.to_string(), "Configuration error: Unknown configuration key: nope");
    }

    #[test]
    fn locked_database_maps_to_locked() {
        let locked = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        );
        assert!(matches!(DatabaseError::from(locked), DatabaseError::Locked));

        let err: CoreError = DatabaseError::Locked.into();
        assert_eq!(err.to_string(), "Database error: Database is locked");
    }
}
