//! Error types for the bridge binary.

use thiserror::Error;

/// Main error type for the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration errors (invalid flags, filters, credentials).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup errors (spec loading, catalog building, bind failures).
    #[error("Startup error: {0}")]
    Startup(String),

    /// Runtime errors (session/stream failures).
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
