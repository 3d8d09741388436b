//! Error types for the events relay

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the library
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// ABI loading error
    #[error("ABI load error: {0}")]
    AbiLoad(String),

    /// Chain RPC (transport) error
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Store read/write error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Message bus error
    #[error("Message bus error: {0}")]
    Bus(String),

    /// Event payload decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Spawned task failed to complete
    #[error("Task error: {0}")]
    Task(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while turning a raw log into a normalized payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no decode shape for event '{event}' of contract type '{contract_type}'")]
    UnknownEvent {
        contract_type: String,
        event: String,
    },

    #[error("payload of '{event}' does not match its shape: {reason}")]
    Payload { event: String, reason: String },

    #[error("log of '{event}' has no topic for indexed field '{field}'")]
    MissingTopic { event: String, field: String },

    #[error("field '{field}' value {value} does not fit a 128-bit integer")]
    IntegerOverflow { field: String, value: String },
}

impl RelayError {
    /// Transport errors abort the current pass; everything else is local to one log or record.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Bus(_))
    }
}

impl From<tokio_postgres::Error> for RelayError {
    fn from(e: tokio_postgres::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
