//! Error types for ClawLink

use std::time::Duration;

use thiserror::Error;

/// Result type alias using ClawLink's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ClawLink
#[derive(Error, Debug)]
pub enum Error {
    /// Operation needs an open gateway connection
    #[error("Not connected to gateway")]
    NotConnected,

    /// No reply arrived within the request budget
    #[error("Request {id} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Correlation id of the request
        id: String,
        /// Configured timeout
        after: Duration,
    },

    /// The connection died before a reply arrived
    #[error("Connection to gateway lost")]
    ConnectionLost,

    /// The gateway answered with an explicit error envelope
    #[error("Gateway error: {0}")]
    Remote(String),

    /// Inbound data could not be decoded into an envelope
    #[error("Decode error: {0}")]
    Decode(String),

    /// A correlation id is already pending
    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(String),

    /// A reply payload did not match the expected shape
    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),

    /// Feature or service switched off in configuration
    #[error("{0} disabled")]
    Disabled(String),

    /// Low-level transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected | Error::Timeout { .. } | Error::ConnectionLost | Error::Transport(_)
        )
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotConnected | Error::InvalidInput(_) | Error::Disabled(_)
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidInput(format!("invalid gateway URL: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
