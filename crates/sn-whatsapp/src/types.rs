//! Bridge REST and webhook payload types

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Events the bridge is asked to deliver to the webhook
pub const WEBHOOK_EVENTS: &[&str] = &["MESSAGES_UPSERT", "CONNECTION_UPDATE"];

/// Connection state reported for a paired, online instance
pub const STATE_OPEN: &str = "open";

/// Connection state reported when the link to the phone dropped
pub const STATE_CLOSE: &str = "close";

/// `POST /instance/create` body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub instance_name: String,
    pub qrcode: bool,
    pub integration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub webhook: WebhookSettings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSettings {
    pub url: String,
    pub by_events: bool,
    pub base64: bool,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInstanceResponse {
    pub instance: InstanceInfo,
    #[serde(default)]
    pub hash: Option<InstanceHash>,
    #[serde(default)]
    pub qrcode: Option<QrPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub instance_name: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Instance API key; plain string or `{"apikey": ...}` depending on bridge version
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InstanceHash {
    Key(String),
    Object { apikey: String },
}

impl InstanceHash {
    pub fn api_key(&self) -> &str {
        match self {
            InstanceHash::Key(key) => key,
            InstanceHash::Object { apikey } => apikey,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub pairing_code: Option<String>,
}

/// `GET /instance/connect/{instance}` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub pairing_code: Option<String>,
}

/// `GET /instance/connectionState/{instance}` response
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionStateResponse {
    pub instance: InstanceState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceState {
    pub state: String,
}

/// `POST /message/sendText/{instance}` body
#[derive(Debug, Clone, Serialize)]
pub struct SendTextRequest<'a> {
    pub number: &'a str,
    pub text: &'a str,
}

/// `POST /message/sendMedia/{instance}` body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaRequest<'a> {
    pub number: &'a str,
    pub mediatype: &'a str,
    pub mimetype: &'a str,
    pub caption: &'a str,
    /// Base64 encoded payload
    pub media: String,
    pub file_name: &'a str,
}

/// Bridge media category for a MIME type
pub fn media_type(mime: &str) -> &'static str {
    match mime.split('/').next().unwrap_or_default() {
        "video" => "video",
        "image" => "image",
        "audio" => "audio",
        _ => "document",
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageResponse {
    pub key: MessageKey,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub id: String,
    #[serde(default)]
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
}

// ============================================================================
// Webhook events
// ============================================================================

/// Envelope of every webhook delivery
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub instance: Option<String>,
    /// Instance key the bridge signs deliveries with
    #[serde(default)]
    pub apikey: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WebhookEvent {
    /// Event name normalised to the dotted lowercase form (`messages.upsert`)
    pub fn kind(&self) -> String {
        self.event.to_ascii_lowercase().replace('_', ".")
    }
}

/// `messages.upsert` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpsert {
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<MessageBody>,
    #[serde(default)]
    pub message_timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedText>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtendedText {
    pub text: String,
}

impl MessageBody {
    /// Text content, if this is a text message
    pub fn text(&self) -> Option<&str> {
        self.conversation
            .as_deref()
            .or_else(|| self.extended_text_message.as_ref().map(|e| e.text.as_str()))
    }
}

/// Unix seconds, sent as a number or a numeric string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Number(i64),
    Text(String),
}

impl Timestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let secs = match self {
            Timestamp::Number(n) => *n,
            Timestamp::Text(s) => s.trim().parse().ok()?,
        };
        Utc.timestamp_opt(secs, 0).single()
    }
}

/// `connection.update` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub state: String,
    #[serde(default)]
    pub status_reason: Option<i64>,
}
