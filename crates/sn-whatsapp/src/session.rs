//! Bridge session: what the opaque session token holds for this gateway

use serde::{Deserialize, Serialize};
use sn_core::SessionToken;

use crate::error::{Result, WhatsAppError};

/// Instance registered on the bridge plus its API key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeSession {
    pub instance: String,
    pub api_key: String,
}

impl BridgeSession {
    pub fn new(instance: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            api_key: api_key.into(),
        }
    }

    /// Decode a persisted token
    pub fn from_token(token: &SessionToken) -> Result<Self> {
        let session: BridgeSession = serde_json::from_value(token.as_value().clone())
            .map_err(|e| WhatsAppError::InvalidSession(e.to_string()))?;

        if session.instance.is_empty() || session.api_key.is_empty() {
            return Err(WhatsAppError::InvalidSession(
                "instance and api_key must not be empty".to_string(),
            ));
        }
        Ok(session)
    }

    pub fn to_token(&self) -> SessionToken {
        SessionToken::new(serde_json::json!({
            "instance": self.instance,
            "api_key": self.api_key,
        }))
    }
}
