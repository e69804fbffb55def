//! Connection gateway capability
//!
//! The transport (handshake, encryption, reconnection, low-level send and
//! receive) lives behind [`Gateway`]. Inbound traffic is delivered through
//! the single-consumer channels in [`GatewayEvents`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::GatewayError;

/// Result alias for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// One inbound one-to-one text message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Contact identifier of the remote peer
    pub sender: String,
    /// Sent by this account
    pub from_me: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Binary media sent as an attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub mime_type: String,
    pub caption: String,
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Opaque authenticated transport state
///
/// Only the gateway that produced it interprets the contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub serde_json::Value);

impl SessionToken {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Client identity announced to the chat network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub long_name: String,
    pub short_name: String,
    pub version: String,
}

/// Receiving halves handed out once when a gateway is constructed
#[derive(Debug)]
pub struct GatewayEvents {
    pub messages: mpsc::Receiver<InboundMessage>,
    pub errors: mpsc::Receiver<GatewayError>,
}

impl GatewayEvents {
    /// Create a connected sender/receiver pair with the given capacity
    pub fn channel(capacity: usize) -> (GatewaySender, GatewayEvents) {
        let (msg_tx, msg_rx) = mpsc::channel(capacity);
        let (err_tx, err_rx) = mpsc::channel(capacity);
        (
            GatewaySender {
                messages: msg_tx,
                errors: err_tx,
            },
            GatewayEvents {
                messages: msg_rx,
                errors: err_rx,
            },
        )
    }
}

/// Sending halves kept by the gateway implementation
#[derive(Debug, Clone)]
pub struct GatewaySender {
    pub messages: mpsc::Sender<InboundMessage>,
    pub errors: mpsc::Sender<GatewayError>,
}

/// Anything that yields inbound messages one at a time
#[async_trait]
pub trait MessageSource: Send {
    /// Next message, or `None` once the source is closed
    async fn next_message(&mut self) -> Option<InboundMessage>;
}

#[async_trait]
impl MessageSource for mpsc::Receiver<InboundMessage> {
    async fn next_message(&mut self) -> Option<InboundMessage> {
        self.recv().await
    }
}

/// Connection gateway to the chat network
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Set the client identity announced on login
    fn set_client_identity(&self, identity: &ClientIdentity) -> GatewayResult<()>;

    /// Resume a persisted session
    async fn restore_with_session(&self, session: SessionToken) -> GatewayResult<SessionToken>;

    /// Interactive login
    ///
    /// The pairing string is sent on `pairing` as soon as the gateway has one;
    /// the call returns once the operator has completed pairing or it failed.
    async fn login(&self, pairing: oneshot::Sender<String>) -> GatewayResult<SessionToken>;

    /// Re-establish the current session after a connection failure
    async fn restore(&self) -> GatewayResult<()>;

    /// Liveness check against the remote device
    async fn admin_test(&self) -> GatewayResult<bool>;

    /// Send a text message, returning the message id
    async fn send_text(&self, to: &str, text: &str) -> GatewayResult<String>;

    /// Send a media attachment, returning the message id
    async fn send_media(&self, to: &str, media: MediaAttachment) -> GatewayResult<String>;

    /// Close the connection and hand back the final session
    async fn disconnect(&self) -> GatewayResult<SessionToken>;
}
