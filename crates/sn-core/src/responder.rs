//! Fixed-notice responder
//!
//! Sends the reply text to every qualifying sender and the one-time
//! attachment to contacts that have not received it yet.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{BotConfig, ReplyConfig};
use crate::gateway::{Gateway, MediaAttachment};
use crate::store::FirstContactSet;

/// What happened to the one-time attachment for one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentOutcome {
    /// Contact already has it
    AlreadySent,
    Sent,
    /// Send call issued but reported an error; contact is still marked
    SendFailed,
    /// Attachment file unavailable; contact left eligible
    Missing,
}

/// Result of one [`Responder::respond`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseOutcome {
    pub reply_sent: bool,
    pub attachment: AttachmentOutcome,
}

/// Responder owning the first-contact set
pub struct Responder<G: Gateway> {
    gateway: Arc<G>,
    contacts: FirstContactSet,
    reply: ReplyConfig,
    reply_text_path: PathBuf,
    video_path: PathBuf,
}

impl<G: Gateway> Responder<G> {
    pub fn new(
        gateway: Arc<G>,
        contacts: FirstContactSet,
        reply: ReplyConfig,
        reply_text_path: impl Into<PathBuf>,
        video_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            contacts,
            reply,
            reply_text_path: reply_text_path.into(),
            video_path: video_path.into(),
        }
    }

    /// Build from configuration, loading the first-contact set from disk
    pub async fn from_config(gateway: Arc<G>, config: &BotConfig) -> Self {
        let contacts = FirstContactSet::load(config.storage.video_sent_path()).await;
        Self::new(
            gateway,
            contacts,
            config.reply.clone(),
            config.storage.reply_text_path(),
            config.storage.video_path(),
        )
    }

    pub fn contacts(&self) -> &FirstContactSet {
        &self.contacts
    }

    /// Reply to `sender`, attaching the clip on first contact
    ///
    /// Never fails: every error is logged and the step degrades.
    pub async fn respond(&self, sender: &str) -> ResponseOutcome {
        let text = self.reply_text().await;
        let reply_sent = match self.gateway.send_text(sender, &text).await {
            Ok(id) => {
                info!("Sent reply to {} ({})", sender, id);
                true
            }
            Err(e) => {
                error!("Error sending message to {}: {}", sender, e);
                false
            }
        };

        let attachment = if self.contacts.needs_attachment(sender).await {
            self.send_attachment(sender).await
        } else {
            AttachmentOutcome::AlreadySent
        };

        ResponseOutcome {
            reply_sent,
            attachment,
        }
    }

    /// Current reply body; falls back to the default when unreadable or blank
    async fn reply_text(&self) -> String {
        match tokio::fs::read_to_string(&self.reply_text_path).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("{} is empty, using default reply", self.reply_text_path.display());
                self.reply.default_text.clone()
            }
            Err(e) => {
                warn!(
                    "Cannot read {}: {}, using default reply",
                    self.reply_text_path.display(),
                    e
                );
                self.reply.default_text.clone()
            }
        }
    }

    async fn send_attachment(&self, sender: &str) -> AttachmentOutcome {
        let data = match tokio::fs::read(&self.video_path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    "Cannot find attachment {}: {}, will retry on next message",
                    self.video_path.display(),
                    e
                );
                return AttachmentOutcome::Missing;
            }
        };

        let media = MediaAttachment {
            mime_type: self.reply.video_mime.clone(),
            caption: self.reply.video_caption.clone(),
            file_name: file_name(&self.video_path),
            data,
        };

        let outcome = match self.gateway.send_media(sender, media).await {
            Ok(id) => {
                info!("Sent attachment to {} ({})", sender, id);
                AttachmentOutcome::Sent
            }
            Err(e) => {
                error!("Error sending attachment to {}: {}", sender, e);
                AttachmentOutcome::SendFailed
            }
        };

        if let Err(e) = self.contacts.mark_sent(sender).await {
            error!("Error serializing {}: {}", self.contacts.path().display(), e);
        }

        outcome
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string())
}
