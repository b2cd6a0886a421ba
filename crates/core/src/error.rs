//! Core error types

use thiserror::Error;

/// Core error type for Meshforge
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration value rejected during validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias used by the re-exports in `lib.rs`.
pub type Error = CoreError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
