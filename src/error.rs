//! Error types for the StackQL client.
//!
//! Only configuration problems are surfaced as `Err` from the query pipeline.
//! Failures that happen while a query runs are turned into result values so a
//! batch can report partial success.

use thiserror::Error;

/// Main error type for client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Invalid configuration (unknown output format, bad proxy scheme, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server mode connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Server mode query errors reported by the engine.
    #[error("Query error: {0}")]
    Query(String),

    /// Filesystem errors (config files, pattern files, temp scripts).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "Configuration Error",
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Io(_) => "I/O Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns true for errors raised before any I/O took place.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
