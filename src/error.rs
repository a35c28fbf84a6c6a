//! Error types for the memory lifecycle engine

use thiserror::Error;

use crate::types::MemoryId;

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Main error type for the lifecycle engine
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory not found: {0}")]
    NotFound(MemoryId),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Maintenance lease is held by another run")]
    LeaseHeld,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LifecycleError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            LifecycleError::Storage(_)
            | LifecycleError::Classification(_)
            | LifecycleError::LeaseHeld => true,
            _ => false,
        }
    }

    /// Get error code for the tool protocol layer
    pub fn code(&self) -> i64 {
        match self {
            LifecycleError::NotFound(_) => -32001,
            LifecycleError::InvalidInput(_) => -32602,
            LifecycleError::Config(_) | LifecycleError::TomlParse(_) => -32002,
            LifecycleError::LeaseHeld => -32005,
            _ => -32000,
        }
    }
}
