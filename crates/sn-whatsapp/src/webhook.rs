//! Webhook server for receiving bridge events

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use sn_core::GatewayError;
use sn_core::gateway::{GatewaySender, InboundMessage};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WhatsAppError};
use crate::session::BridgeSession;
use crate::types::{ConnectionUpdate, MessageUpsert, STATE_CLOSE, WebhookEvent};

/// Path the bridge posts to
pub const WEBHOOK_PATH: &str = "/webhook/whatsapp";

/// What a webhook event turns into
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Message(InboundMessage),
    Error(GatewayError),
    Ignored,
}

/// Credentials a delivery must carry
///
/// Shared with the gateway, which fills it in once the instance key is known.
/// Until then every delivery is rejected.
#[derive(Debug, Clone, Default)]
pub struct WebhookAuth {
    expected: Arc<RwLock<Option<BridgeSession>>>,
}

impl WebhookAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept deliveries for `session`
    pub fn expect(&self, session: &BridgeSession) {
        if let Ok(mut expected) = self.expected.write() {
            *expected = Some(session.clone());
        }
    }

    /// Check the instance name and key of a delivery
    pub fn verify(
        &self,
        instance: Option<&str>,
        api_key: Option<&str>,
    ) -> std::result::Result<(), StatusCode> {
        let expected = self.expected.read().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let Some(expected) = expected.as_ref() else {
            return Err(StatusCode::UNAUTHORIZED);
        };

        if api_key != Some(expected.api_key.as_str()) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        if instance != Some(expected.instance.as_str()) {
            return Err(StatusCode::FORBIDDEN);
        }
        Ok(())
    }
}

struct WebhookState {
    sender: GatewaySender,
    auth: WebhookAuth,
}

/// Webhook server
pub struct WebhookServer {
    addr: SocketAddr,
    sender: GatewaySender,
    auth: WebhookAuth,
}

/// Running webhook listener
pub struct WebhookHandle {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WebhookHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting events and wait for in-flight requests
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Webhook task ended abnormally: {}", e);
        }
        info!("Webhook server stopped");
    }
}

impl WebhookServer {
    pub fn new(addr: SocketAddr, sender: GatewaySender, auth: WebhookAuth) -> Self {
        Self { addr, sender, auth }
    }

    pub fn router(sender: GatewaySender, auth: WebhookAuth) -> Router {
        Router::new()
            .route(WEBHOOK_PATH, post(handle_webhook))
            .with_state(Arc::new(WebhookState { sender, auth }))
    }

    /// Bind and serve in the background
    pub async fn spawn(self) -> Result<WebhookHandle> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| WhatsAppError::Webhook(format!("bind {}: {}", self.addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| WhatsAppError::Webhook(e.to_string()))?;

        info!("Starting WhatsApp webhook server on {}", local_addr);

        let app = Self::router(self.sender, self.auth);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!("Webhook server error: {}", e);
            }
        });

        Ok(WebhookHandle {
            local_addr,
            shutdown,
            task,
        })
    }
}

/// Handle one bridge event
///
/// The instance key is taken from the `apikey` header, or from the body as
/// the bridge sends it.
async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Invalid webhook payload: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let api_key = headers
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .or(event.apikey.as_deref());
    if let Err(status) = state.auth.verify(event.instance.as_deref(), api_key) {
        warn!(
            "Rejected webhook event {} for instance {:?}: {}",
            event.event, event.instance, status
        );
        return status;
    }
    let sender = &state.sender;

    match route_event(&event) {
        Routed::Message(msg) => {
            debug!("Received message from {}", msg.sender);
            if sender.messages.send(msg).await.is_err() {
                warn!("Message dispatcher gone, dropping message");
            }
        }
        Routed::Error(err) => {
            if sender.errors.send(err).await.is_err() {
                warn!("Error handler gone, dropping gateway error");
            }
        }
        Routed::Ignored => {
            debug!("Ignoring webhook event {}", event.event);
        }
    }

    StatusCode::OK
}

/// Classify a bridge event
pub fn route_event(event: &WebhookEvent) -> Routed {
    match event.kind().as_str() {
        "messages.upsert" => route_message(&event.data),
        "connection.update" => route_connection(&event.data),
        _ => Routed::Ignored,
    }
}

fn route_message(data: &serde_json::Value) -> Routed {
    let upsert: MessageUpsert = match serde_json::from_value(data.clone()) {
        Ok(upsert) => upsert,
        Err(e) => {
            return Routed::Error(GatewayError::Api(format!("malformed message event: {}", e)));
        }
    };

    // only text messages are answered
    let Some(text) = upsert.message.as_ref().and_then(|m| m.text()) else {
        return Routed::Ignored;
    };
    let Some(timestamp) = upsert.message_timestamp.as_ref().and_then(|t| t.to_datetime()) else {
        return Routed::Error(GatewayError::Api(format!(
            "message {} has no usable timestamp",
            upsert.key.id
        )));
    };

    Routed::Message(InboundMessage {
        sender: upsert.key.remote_jid,
        from_me: upsert.key.from_me,
        timestamp,
        text: text.to_string(),
    })
}

fn route_connection(data: &serde_json::Value) -> Routed {
    match serde_json::from_value::<ConnectionUpdate>(data.clone()) {
        Ok(update) if update.state == STATE_CLOSE => {
            Routed::Error(GatewayError::ConnectionFailed(match update.status_reason {
                Some(reason) => format!("connection closed (reason {})", reason),
                None => "connection closed".to_string(),
            }))
        }
        Ok(update) => {
            debug!("Connection state: {}", update.state);
            Routed::Ignored
        }
        Err(e) => Routed::Error(GatewayError::Api(format!("malformed connection event: {}", e))),
    }
}
