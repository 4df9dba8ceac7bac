//! Error types for voltex

use thiserror::Error;

/// Main error type for voltex
#[derive(Error, Debug)]
pub enum VoltexError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Proxy error: {0}")]
    ProxyError(String),

    #[error("No free address left after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not deployed: {0}")]
    NotDeployed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
