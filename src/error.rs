//! Error types for Napguard.

use thiserror::Error;

/// Main error type for Napguard operations.
#[derive(Error, Debug)]
pub enum NapguardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limiter was registered with a nonsensical quota
    #[error("Invalid limit for '{name}': {reason}")]
    InvalidLimit { name: String, reason: String },

    /// No limiter is registered under the requested name
    #[error("Unknown limiter: {0}")]
    UnknownLimiter(String),

    /// Layered settings could not be built or deserialized
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Napguard operations.
pub type Result<T> = std::result::Result<T, NapguardError>;
