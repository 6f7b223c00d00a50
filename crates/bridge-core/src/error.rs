//! Error types for the chat bridge

use thiserror::Error;

/// Main error type for all bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start session: {0}")]
    SessionStart(String),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("Not available: {0}")]
    NotAvailable(String),

    #[error("Logout failed: {0}")]
    Logout(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
