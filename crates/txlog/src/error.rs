//! Transaction Log Errors

use thiserror::Error;

/// Errors raised by log storage
#[derive(Error, Debug)]
pub enum LogError {
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt log key: {0}")]
    CorruptKey(String),

    #[error("Log write rejected: {0}")]
    WriteRejected(String),
}

/// Result type for log operations
pub type Result<T> = std::result::Result<T, LogError>;
