//! Error types for noise-store.

use std::path::PathBuf;

/// Result type for noise-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in noise-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Monitor not found in the registry.
    #[error("Monitor not found: {0}")]
    MonitorNotFound(String),

    /// A registry entry names a readings table that fails validation.
    #[error("Invalid readings table name: {0}")]
    InvalidTableName(String),

    /// The database was written by a newer schema than this build knows.
    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
