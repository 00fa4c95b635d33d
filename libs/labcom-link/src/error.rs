//! Link Layer Error Types
//!
//! Core error types shared by the transport and protocol crates.

use thiserror::Error;

/// Result type for labcom-link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Instrument link errors
#[derive(Debug, Error, Clone)]
pub enum LinkError {
    /// Protocol-level errors (framing, record structure)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Checksum or CRC mismatch on a received frame
    #[error("Checksum error: {0}")]
    Checksum(String),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request already outstanding for the same correlation key
    #[error("Busy: {0}")]
    Busy(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::InvalidData(format!("JSON error: {}", err))
    }
}

// Helper methods for creating errors
impl LinkError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        LinkError::Protocol(msg.into())
    }

    pub fn checksum(msg: impl Into<String>) -> Self {
        LinkError::Checksum(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        LinkError::Connection(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        LinkError::Io(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        LinkError::Timeout(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        LinkError::InvalidData(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        LinkError::Config(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        LinkError::Busy(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        LinkError::Internal(msg.into())
    }

    /// Check if this error indicates a need for reconnection
    pub fn needs_reconnect(&self) -> bool {
        match self {
            LinkError::Io(msg) => {
                msg.contains("Broken pipe")
                    || msg.contains("Connection reset")
                    || msg.contains("Connection refused")
                    || msg.contains("Connection aborted")
                    || msg.contains("Network is unreachable")
            },
            LinkError::Connection(_) => true,
            LinkError::NotConnected => true,
            _ => false,
        }
    }
}
