//! WhatsApp gateway backed by the HTTP bridge

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sn_core::gateway::{GatewayResult, GatewaySender};
use sn_core::{
    BridgeConfig, ClientIdentity, ConnectionConfig, Gateway, GatewayError, GatewayEvents,
    MediaAttachment, SessionToken,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::BridgeClient;
use crate::error::{Result, WhatsAppError};
use crate::session::BridgeSession;
use crate::types::{CreateInstanceRequest, STATE_OPEN, WEBHOOK_EVENTS, WebhookSettings};
use crate::webhook::{WebhookAuth, WebhookHandle, WebhookServer};

/// Bridge integration used for new instances
const INTEGRATION: &str = "WHATSAPP-BAILEYS";

/// Capacity of the inbound event channels
const EVENT_CAPACITY: usize = 64;

/// Gateway over a WhatsApp HTTP bridge
pub struct BridgeGateway {
    client: BridgeClient,
    instance: String,
    webhook_addr: SocketAddr,
    webhook_url: String,
    login_timeout: Duration,
    restore_timeout: Duration,
    poll_interval: Duration,
    sender: GatewaySender,
    auth: WebhookAuth,
    identity: Mutex<Option<ClientIdentity>>,
    session: Mutex<Option<BridgeSession>>,
    webhook: tokio::sync::Mutex<Option<WebhookHandle>>,
}

impl BridgeGateway {
    /// Create the gateway and the event channels it feeds
    pub fn new(bridge: &BridgeConfig, connection: &ConnectionConfig) -> Result<(Self, GatewayEvents)> {
        let webhook_addr: SocketAddr = bridge.webhook_listen.parse().map_err(|e| {
            WhatsAppError::Config(format!("invalid webhook_listen {}: {}", bridge.webhook_listen, e))
        })?;
        if bridge.instance.is_empty() {
            return Err(WhatsAppError::Config("bridge instance name is empty".to_string()));
        }

        let client = BridgeClient::new(
            &bridge.base_url,
            bridge.api_key.clone(),
            connection.connect_timeout(),
        )?;
        let (sender, events) = GatewayEvents::channel(EVENT_CAPACITY);

        let gateway = Self {
            client,
            instance: bridge.instance.clone(),
            webhook_addr,
            webhook_url: bridge.webhook_url.clone(),
            login_timeout: connection.login_timeout(),
            restore_timeout: connection.restore_timeout(),
            poll_interval: Duration::from_secs(2),
            sender,
            auth: WebhookAuth::new(),
            identity: Mutex::new(None),
            session: Mutex::new(None),
            webhook: tokio::sync::Mutex::new(None),
        };
        Ok((gateway, events))
    }

    /// Override the login polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Address the webhook listener is bound to, once started
    pub async fn webhook_addr(&self) -> Option<SocketAddr> {
        self.webhook.lock().await.as_ref().map(|h| h.local_addr())
    }

    fn current_session(&self) -> Option<BridgeSession> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn set_session(&self, session: BridgeSession) {
        if let Ok(mut slot) = self.session.lock() {
            *slot = Some(session);
        }
    }

    fn require_session(&self) -> GatewayResult<BridgeSession> {
        self.current_session()
            .ok_or_else(|| GatewayError::from(WhatsAppError::NotConnected))
    }

    async fn ensure_webhook(&self) -> Result<()> {
        let mut webhook = self.webhook.lock().await;
        if webhook.is_none() {
            let handle = WebhookServer::new(self.webhook_addr, self.sender.clone(), self.auth.clone())
                .spawn()
                .await?;
            *webhook = Some(handle);
        }
        Ok(())
    }

    /// Reconnect `session` and wait for the instance to report open
    async fn reconnect(&self, session: &BridgeSession) -> GatewayResult<()> {
        self.client
            .connect(session)
            .await
            .map_err(|e| GatewayError::Restore(e.to_string()))?;

        self.wait_until_open(session, self.restore_timeout)
            .await
            .map_err(|e| GatewayError::Restore(e.to_string()))
    }

    fn create_request(&self) -> CreateInstanceRequest {
        let client_name = self
            .identity
            .lock()
            .ok()
            .and_then(|i| i.clone())
            .map(|i| format!("{} ({} {})", i.long_name, i.short_name, i.version));

        CreateInstanceRequest {
            instance_name: self.instance.clone(),
            qrcode: true,
            integration: INTEGRATION.to_string(),
            client_name,
            webhook: WebhookSettings {
                url: self.webhook_url.clone(),
                by_events: false,
                base64: false,
                events: WEBHOOK_EVENTS.iter().map(|e| e.to_string()).collect(),
            },
        }
    }

    /// Poll the connection state until `open`, for at most `limit`
    async fn wait_until_open(&self, session: &BridgeSession, limit: Duration) -> GatewayResult<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        let poll = async {
            loop {
                ticker.tick().await;
                match self.client.connection_state(session).await {
                    Ok(state) if state == STATE_OPEN => return,
                    Ok(state) => debug!("Waiting for {} to open, state: {}", session.instance, state),
                    Err(e) => debug!("Polling connection state failed: {}", e),
                }
            }
        };

        tokio::time::timeout(limit, poll).await.map_err(|_| {
            GatewayError::Timeout(format!(
                "instance {} not open within {}s",
                session.instance,
                limit.as_secs()
            ))
        })
    }
}

#[async_trait]
impl Gateway for BridgeGateway {
    fn set_client_identity(&self, identity: &ClientIdentity) -> GatewayResult<()> {
        if identity.long_name.is_empty() || identity.short_name.is_empty() {
            return Err(GatewayError::Config("client name must not be empty".to_string()));
        }
        let mut slot = self
            .identity
            .lock()
            .map_err(|_| GatewayError::Other("identity lock poisoned".to_string()))?;
        *slot = Some(identity.clone());
        Ok(())
    }

    async fn restore_with_session(&self, session: SessionToken) -> GatewayResult<SessionToken> {
        let session = BridgeSession::from_token(&session)?;
        self.auth.expect(&session);
        self.ensure_webhook().await?;

        self.reconnect(&session).await?;

        info!("Restored session for instance {}", session.instance);
        let token = session.to_token();
        self.set_session(session);
        Ok(token)
    }

    async fn login(&self, pairing: oneshot::Sender<String>) -> GatewayResult<SessionToken> {
        if !self.client.has_global_key() {
            return Err(GatewayError::Config("BRIDGE_API_KEY not set".to_string()));
        }
        self.ensure_webhook().await?;

        let created = self
            .client
            .create_instance(&self.create_request())
            .await
            .map_err(|e| GatewayError::Login(e.to_string()))?;

        let api_key = created
            .hash
            .as_ref()
            .map(|h| h.api_key().to_string())
            .ok_or_else(|| GatewayError::Login("bridge returned no instance key".to_string()))?;
        let session = BridgeSession::new(created.instance.instance_name, api_key);
        self.auth.expect(&session);

        let code = match created.qrcode.and_then(|q| q.code) {
            Some(code) => code,
            None => self
                .client
                .connect(&session)
                .await
                .map_err(|e| GatewayError::Login(e.to_string()))?
                .code
                .ok_or_else(|| GatewayError::Login("bridge returned no pairing code".to_string()))?,
        };

        if pairing.send(code).is_err() {
            warn!("Pairing code receiver dropped");
        }

        self.wait_until_open(&session, self.login_timeout).await?;

        info!("Paired instance {}", session.instance);
        let token = session.to_token();
        self.set_session(session);
        Ok(token)
    }

    async fn restore(&self) -> GatewayResult<()> {
        let session = self
            .current_session()
            .ok_or_else(|| GatewayError::Restore("no session to restore".to_string()))?;

        self.reconnect(&session).await
    }

    async fn admin_test(&self) -> GatewayResult<bool> {
        let session = self.require_session()?;
        let state = self.client.connection_state(&session).await?;
        Ok(state == STATE_OPEN)
    }

    async fn send_text(&self, to: &str, text: &str) -> GatewayResult<String> {
        let session = self.require_session()?;
        self.client
            .send_text(&session, to, text)
            .await
            .map_err(|e| GatewayError::Send(e.to_string()))
    }

    async fn send_media(&self, to: &str, media: MediaAttachment) -> GatewayResult<String> {
        let session = self.require_session()?;
        self.client
            .send_media(&session, to, &media)
            .await
            .map_err(|e| GatewayError::Send(e.to_string()))
    }

    async fn disconnect(&self) -> GatewayResult<SessionToken> {
        if let Some(handle) = self.webhook.lock().await.take() {
            handle.stop().await;
        }

        let session = self.require_session()?;
        info!("Disconnected from instance {}", session.instance);
        Ok(session.to_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn configs(server: &MockServer, api_key: Option<&str>) -> (BridgeConfig, ConnectionConfig) {
        let bridge = BridgeConfig {
            base_url: server.uri(),
            api_key: api_key.map(str::to_string),
            instance: "bot".to_string(),
            webhook_listen: "127.0.0.1:0".to_string(),
            webhook_url: "http://127.0.0.1:8088/webhook/whatsapp".to_string(),
        };
        let connection = ConnectionConfig {
            login_timeout_secs: 1,
            restore_timeout_secs: 1,
            ..Default::default()
        };
        (bridge, connection)
    }

    fn gateway(server: &MockServer, api_key: Option<&str>) -> BridgeGateway {
        let (bridge, connection) = configs(server, api_key);
        let (gateway, _events) = BridgeGateway::new(&bridge, &connection).unwrap();
        gateway.with_poll_interval(Duration::from_millis(10))
    }

    async fn mount_state(server: &MockServer, state: &str) {
        Mock::given(method("GET"))
            .and(path("/instance/connectionState/bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instance": {"instanceName": "bot", "state": state}
            })))
            .mount(server)
            .await;
    }

    async fn mount_connect(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/instance/connect/bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0})))
            .mount(server)
            .await;
    }

    #[test]
    fn test_invalid_listen_address() {
        let bridge = BridgeConfig {
            webhook_listen: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            BridgeGateway::new(&bridge, &ConnectionConfig::default()),
            Err(WhatsAppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_login_pairs_and_returns_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/instance/create"))
            .and(header("apikey", "global"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "instance": {"instanceName": "bot", "status": "created"},
                "hash": "inst-key",
                "qrcode": {"code": "2@pairing"}
            })))
            .mount(&server)
            .await;
        mount_state(&server, "open").await;

        let gateway = gateway(&server, Some("global"));
        gateway
            .set_client_identity(&ConnectionConfig::default().client_identity())
            .unwrap();

        let (tx, rx) = oneshot::channel();
        let token = gateway.login(tx).await.unwrap();

        assert_eq!(rx.await.unwrap(), "2@pairing");
        assert_eq!(token, BridgeSession::new("bot", "inst-key").to_token());
        assert!(gateway.webhook_addr().await.is_some());
        assert!(gateway.admin_test().await.unwrap());

        let final_token = gateway.disconnect().await.unwrap();
        assert_eq!(final_token, token);
        assert!(gateway.webhook_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_login_fetches_code_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/instance/create"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "instance": {"instanceName": "bot"},
                "hash": {"apikey": "inst-key"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/instance/connect/bot"))
            .and(header("apikey", "inst-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "2@late"})))
            .mount(&server)
            .await;
        mount_state(&server, "open").await;

        let gateway = gateway(&server, Some("global"));
        let (tx, rx) = oneshot::channel();
        gateway.login(tx).await.unwrap();
        assert_eq!(rx.await.unwrap(), "2@late");
    }

    #[tokio::test]
    async fn test_login_times_out_without_pairing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/instance/create"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "instance": {"instanceName": "bot"},
                "hash": "inst-key",
                "qrcode": {"code": "2@pairing"}
            })))
            .mount(&server)
            .await;
        mount_state(&server, "connecting").await;

        let gateway = gateway(&server, Some("global"));
        let (tx, _rx) = oneshot::channel();
        assert!(matches!(gateway.login(tx).await, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_login_requires_global_key() {
        let server = MockServer::start().await;
        let gateway = gateway(&server, None);
        let (tx, _rx) = oneshot::channel();
        assert!(matches!(gateway.login(tx).await, Err(GatewayError::Config(_))));
    }

    #[tokio::test]
    async fn test_restore_with_session() {
        let server = MockServer::start().await;
        mount_connect(&server).await;
        mount_state(&server, "open").await;

        let gateway = gateway(&server, None);
        let saved = BridgeSession::new("bot", "inst-key").to_token();
        let token = gateway.restore_with_session(saved.clone()).await.unwrap();
        assert_eq!(token, saved);
        assert!(gateway.restore().await.is_ok());

        gateway.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_waits_while_connecting() {
        let server = MockServer::start().await;
        mount_connect(&server).await;
        Mock::given(method("GET"))
            .and(path("/instance/connectionState/bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instance": {"instanceName": "bot", "state": "connecting"}
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount_state(&server, "open").await;

        let gateway = gateway(&server, None);
        let saved = BridgeSession::new("bot", "inst-key").to_token();
        gateway.restore_with_session(saved).await.unwrap();

        // link drops and comes back through `connecting` again
        Mock::given(method("GET"))
            .and(path("/instance/connectionState/bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instance": {"instanceName": "bot", "state": "connecting"}
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        assert!(gateway.restore().await.is_ok());

        gateway.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_accepts_only_own_instance() {
        let server = MockServer::start().await;
        mount_connect(&server).await;
        mount_state(&server, "open").await;

        let (bridge, connection) = configs(&server, None);
        let (gateway, mut events) = BridgeGateway::new(&bridge, &connection).unwrap();
        gateway
            .restore_with_session(BridgeSession::new("bot", "inst-key").to_token())
            .await
            .unwrap();

        let addr = gateway.webhook_addr().await.unwrap();
        let url = format!("http://{}{}", addr, crate::webhook::WEBHOOK_PATH);
        let upsert = |apikey: &str| {
            json!({
                "event": "messages.upsert",
                "instance": "bot",
                "apikey": apikey,
                "data": {
                    "key": {"remoteJid": "A@s.whatsapp.net", "fromMe": false, "id": "W1"},
                    "message": {"conversation": "hi"},
                    "messageTimestamp": 1700000001
                }
            })
        };
        let client = reqwest::Client::new();

        let forged = client.post(&url).json(&upsert("guess")).send().await.unwrap();
        assert_eq!(forged.status(), 401);

        let genuine = client.post(&url).json(&upsert("inst-key")).send().await.unwrap();
        assert_eq!(genuine.status(), 200);
        assert_eq!(events.messages.recv().await.unwrap().sender, "A@s.whatsapp.net");

        gateway.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_with_closed_instance_fails() {
        let server = MockServer::start().await;
        mount_connect(&server).await;
        mount_state(&server, "close").await;

        let gateway = gateway(&server, None);
        let saved = BridgeSession::new("bot", "inst-key").to_token();
        assert!(matches!(
            gateway.restore_with_session(saved).await,
            Err(GatewayError::Restore(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_with_malformed_session() {
        let server = MockServer::start().await;
        let gateway = gateway(&server, None);
        let result = gateway
            .restore_with_session(SessionToken::new(json!({"unexpected": true})))
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidSession(_))));
    }

    #[tokio::test]
    async fn test_operations_require_session() {
        let server = MockServer::start().await;
        let gateway = gateway(&server, None);

        assert!(gateway.send_text("A", "x").await.is_err());
        assert!(gateway.admin_test().await.is_err());
        assert!(matches!(gateway.restore().await, Err(GatewayError::Restore(_))));
        assert!(gateway.disconnect().await.is_err());
    }

    #[test]
    fn test_empty_identity_rejected() {
        let bridge = BridgeConfig {
            webhook_listen: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let (gateway, _events) = BridgeGateway::new(&bridge, &ConnectionConfig::default()).unwrap();
        let identity = ClientIdentity {
            long_name: String::new(),
            short_name: "Chrome".into(),
            version: "87".into(),
        };
        assert!(gateway.set_client_identity(&identity).is_err());
    }
}
