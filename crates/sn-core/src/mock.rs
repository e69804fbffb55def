//! Recording gateway for tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::oneshot;

use crate::error::GatewayError;
use crate::gateway::{ClientIdentity, Gateway, GatewayResult, MediaAttachment, SessionToken};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { to: String, text: String },
    Media { to: String, caption: String, bytes: usize },
}

#[derive(Debug, Default)]
pub struct MockGateway {
    pub sent: Mutex<Vec<Sent>>,
    pub identity: Mutex<Option<ClientIdentity>>,
    pub restored_with: Mutex<Option<SessionToken>>,
    pub restores: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub media_started: AtomicUsize,

    pub fail_text: bool,
    pub fail_media: bool,
    pub fail_restore_with_session: bool,
    pub fail_restore: bool,
    pub fail_login: bool,
    pub fail_disconnect: bool,
    pub admin_ok: bool,
    pub pairing_code: Option<String>,
    pub media_delay: Option<Duration>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            admin_ok: true,
            pairing_code: Some("2@pairing-code".to_string()),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn media_to(&self, to: &str) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Media { to: t, .. } if t == to))
            .count()
    }

    pub fn texts_to(&self, to: &str) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Text { to: t, .. } if t == to))
            .count()
    }

    pub fn session() -> SessionToken {
        SessionToken::new(json!({"instance": "mock", "api_key": "fresh"}))
    }
}

#[async_trait]
impl Gateway for MockGateway {
    fn set_client_identity(&self, identity: &ClientIdentity) -> GatewayResult<()> {
        *self.identity.lock().unwrap() = Some(identity.clone());
        Ok(())
    }

    async fn restore_with_session(&self, session: SessionToken) -> GatewayResult<SessionToken> {
        if self.fail_restore_with_session {
            return Err(GatewayError::Restore("rejected".into()));
        }
        *self.restored_with.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    async fn login(&self, pairing: oneshot::Sender<String>) -> GatewayResult<SessionToken> {
        if let Some(code) = &self.pairing_code {
            let _ = pairing.send(code.clone());
        }
        if self.fail_login {
            return Err(GatewayError::Login("not scanned".into()));
        }
        Ok(Self::session())
    }

    async fn restore(&self) -> GatewayResult<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if self.fail_restore {
            return Err(GatewayError::Restore("still down".into()));
        }
        Ok(())
    }

    async fn admin_test(&self) -> GatewayResult<bool> {
        Ok(self.admin_ok)
    }

    async fn send_text(&self, to: &str, text: &str) -> GatewayResult<String> {
        if self.fail_text {
            return Err(GatewayError::Send("text".into()));
        }
        self.sent.lock().unwrap().push(Sent::Text {
            to: to.to_string(),
            text: text.to_string(),
        });
        Ok("text-id".to_string())
    }

    async fn send_media(&self, to: &str, media: MediaAttachment) -> GatewayResult<String> {
        self.media_started.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.media_delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(Sent::Media {
            to: to.to_string(),
            caption: media.caption,
            bytes: media.data.len(),
        });
        if self.fail_media {
            return Err(GatewayError::Send("media".into()));
        }
        Ok("media-id".to_string())
    }

    async fn disconnect(&self) -> GatewayResult<SessionToken> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(GatewayError::Other("not connected".into()));
        }
        Ok(SessionToken::new(json!({"instance": "mock", "api_key": "final"})))
    }
}
