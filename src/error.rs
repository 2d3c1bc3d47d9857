//! Unified error types for Veilsync

use thiserror::Error;

/// Unified Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Veilsync
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Profile or subscription store unavailable, or a constraint was violated
    #[error("Storage error: {0}")]
    Storage(String),

    /// Fetch failed, timed out, or returned undecodable content
    #[error("Network error: {0}")]
    Network(String),

    /// Subscription document produced no usable profiles
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// Another subscription already owns the group label
    #[error("Group already exists: {0}")]
    DuplicateGroup(String),

    /// A single profile URI could not be parsed
    #[error("Invalid profile URI: {0}")]
    InvalidProfileUri(String),

    /// Worker unreachable or died
    #[error("Channel error: {0}")]
    Channel(String),

    /// Timeout
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a new WebSocket error
    pub fn websocket<S: Into<String>>(msg: S) -> Self {
        Error::WebSocket(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Error::Network(msg.into())
    }

    /// Create a new invalid subscription error
    pub fn invalid_subscription<S: Into<String>>(msg: S) -> Self {
        Error::InvalidSubscription(msg.into())
    }

    /// Create a new duplicate group error
    pub fn duplicate_group<S: Into<String>>(group: S) -> Self {
        Error::DuplicateGroup(group.into())
    }

    /// Create a new invalid profile URI error
    pub fn invalid_profile_uri<S: Into<String>>(msg: S) -> Self {
        Error::InvalidProfileUri(msg.into())
    }

    /// Create a new channel error
    pub fn channel<S: Into<String>>(msg: S) -> Self {
        Error::Channel(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Whether the error came from the worker control channel
    pub fn is_channel(&self) -> bool {
        matches!(
            self,
            Error::Channel(_) | Error::WebSocket(_) | Error::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::network(format!("request timed out: {}", err))
        } else {
            Error::network(err.to_string())
        }
    }
}
