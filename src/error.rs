//! Meshelect Error Types

use thiserror::Error;

/// Result type alias for meshelect operations
pub type Result<T> = std::result::Result<T, Error>;

/// Meshelect error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Address errors
    #[error("Invalid node address: {0}")]
    InvalidAddress(String),

    #[error("Could not determine local node address: {0}")]
    LocalAddress(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed payload from {source_addr}: {reason}")]
    MalformedPayload { source_addr: String, reason: String },

    #[error("Request timeout to {0}")]
    RequestTimeout(String),

    // Sensor errors
    #[error("Sensor read failed: {0}")]
    Sensor(String),

    // Mailbox errors
    #[error("Event mailbox closed")]
    MailboxClosed,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is transient. Transient failures are logged
    /// and dropped; the periodic timer cycle is the only retry mechanism.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::MalformedPayload { .. }
                | Error::RequestTimeout(_)
                | Error::Sensor(_)
        )
    }
}
