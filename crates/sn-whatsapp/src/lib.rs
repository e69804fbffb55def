//! sn-whatsapp: WhatsApp gateway for switch-notice via an HTTP bridge
//!
//! The bridge (Evolution API style) owns the WhatsApp Web connection. This
//! crate talks to its REST API, receives its webhook events, and exposes the
//! result as an [`sn_core::Gateway`].

pub mod api;
pub mod error;
pub mod gateway;
pub mod session;
pub mod types;
pub mod webhook;

pub use api::BridgeClient;
pub use error::{Result, WhatsAppError};
pub use gateway::BridgeGateway;
pub use session::BridgeSession;
pub use webhook::{WebhookHandle, WebhookServer};
