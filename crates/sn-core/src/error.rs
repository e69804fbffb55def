//! Error types for sn-core

use thiserror::Error;

/// Errors reported by a connection gateway
///
/// Every gateway implementation maps its internal failures onto this
/// vocabulary so the lifecycle can tell transient failures from the rest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Login failed: {0}")]
    Login(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Gateway API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Gateway configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Whether this is the transient kind recovered by delay + restore
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, GatewayError::ConnectionFailed(_))
    }
}

/// Main error type for sn-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Pairing image error: {0}")]
    Image(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

/// Result type alias for sn-core
pub type Result<T> = std::result::Result<T, Error>;
