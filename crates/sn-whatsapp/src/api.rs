//! WhatsApp HTTP bridge REST client
//!
//! Communicates with an Evolution API style bridge server

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use sn_core::MediaAttachment;

use crate::error::{Result, WhatsAppError};
use crate::session::BridgeSession;
use crate::types::*;

/// Bridge REST API client
#[derive(Clone)]
pub struct BridgeClient {
    client: Client,
    base_url: String,
    global_key: Option<String>,
}

impl BridgeClient {
    /// Create a new bridge client
    pub fn new(base_url: &str, global_key: Option<String>, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(WhatsAppError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            global_key,
        })
    }

    pub fn has_global_key(&self) -> bool {
        self.global_key.is_some()
    }

    /// Register a new instance and request a pairing code
    pub async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse> {
        let key = self
            .global_key
            .as_deref()
            .ok_or_else(|| WhatsAppError::Config("bridge api key not set".to_string()))?;

        let url = format!("{}/instance/create", self.base_url);
        debug!("Creating bridge instance {}", request.instance_name);

        let response = send(self.client.post(&url).header("apikey", key).json(request)).await?;
        parse(response).await
    }

    /// Ask the bridge to (re)connect an instance
    ///
    /// While unpaired the response carries a fresh pairing code.
    pub async fn connect(&self, session: &BridgeSession) -> Result<ConnectResponse> {
        let url = format!("{}/instance/connect/{}", self.base_url, session.instance);
        let response = send(self.authed(self.client.get(&url), session)).await?;
        parse(response).await
    }

    /// Current connection state of an instance (`open`, `connecting`, `close`)
    pub async fn connection_state(&self, session: &BridgeSession) -> Result<String> {
        let url = format!("{}/instance/connectionState/{}", self.base_url, session.instance);
        let response = send(self.authed(self.client.get(&url), session)).await?;
        let state: ConnectionStateResponse = parse(response).await?;
        debug!("Instance {} state: {}", session.instance, state.instance.state);
        Ok(state.instance.state)
    }

    /// Send a text message, returning the message id
    pub async fn send_text(&self, session: &BridgeSession, number: &str, text: &str) -> Result<String> {
        let url = format!("{}/message/sendText/{}", self.base_url, session.instance);
        let body = SendTextRequest { number, text };

        debug!("Sending text to {}", number);
        let response = send(self.authed(self.client.post(&url), session).json(&body)).await?;
        let sent: SendMessageResponse = parse(response).await?;

        info!("Message sent to {} ({})", number, sent.key.id);
        Ok(sent.key.id)
    }

    /// Send a media attachment, returning the message id
    pub async fn send_media(
        &self,
        session: &BridgeSession,
        number: &str,
        media: &MediaAttachment,
    ) -> Result<String> {
        let url = format!("{}/message/sendMedia/{}", self.base_url, session.instance);
        let body = SendMediaRequest {
            number,
            mediatype: media_type(&media.mime_type),
            mimetype: &media.mime_type,
            caption: &media.caption,
            media: STANDARD.encode(&media.data),
            file_name: &media.file_name,
        };

        debug!("Sending {} bytes of {} to {}", media.data.len(), media.mime_type, number);
        let response = send(self.authed(self.client.post(&url), session).json(&body)).await?;
        let sent: SendMessageResponse = parse(response).await?;

        info!("Media sent to {} ({})", number, sent.key.id);
        Ok(sent.key.id)
    }

    fn authed(&self, builder: RequestBuilder, session: &BridgeSession) -> RequestBuilder {
        builder.header("apikey", &session.api_key)
    }
}

/// Send a request and turn non-success statuses into API errors
async fn send(builder: RequestBuilder) -> Result<Response> {
    let response = builder.send().await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        error!("Bridge request failed: {} - {}", status, error_text);
        return Err(WhatsAppError::Api(format!("{}: {}", status, error_text)));
    }

    Ok(response)
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| WhatsAppError::Parse(e.to_string()))
}
