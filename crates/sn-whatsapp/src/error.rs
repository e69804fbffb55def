//! Error types for sn-whatsapp

use sn_core::GatewayError;
use thiserror::Error;

/// sn-whatsapp error type
#[derive(Error, Debug)]
pub enum WhatsAppError {
    #[error("Bridge API error: {0}")]
    Api(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<WhatsAppError> for GatewayError {
    fn from(err: WhatsAppError) -> Self {
        match err {
            WhatsAppError::Http(e) if e.is_timeout() => GatewayError::Timeout(e.to_string()),
            WhatsAppError::Http(e) if e.is_connect() => {
                GatewayError::ConnectionFailed(e.to_string())
            }
            WhatsAppError::Http(e) => GatewayError::Http(e.to_string()),
            WhatsAppError::Api(msg) | WhatsAppError::Parse(msg) => GatewayError::Api(msg),
            WhatsAppError::InvalidSession(msg) => GatewayError::InvalidSession(msg),
            WhatsAppError::NotConnected => GatewayError::Other("not connected".to_string()),
            WhatsAppError::Webhook(msg) | WhatsAppError::Config(msg) => GatewayError::Config(msg),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WhatsAppError>;
