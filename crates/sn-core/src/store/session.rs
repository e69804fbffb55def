//! Session token persistence

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::write_atomic;
use crate::Result;
use crate::gateway::SessionToken;

/// Single-slot store for the serialized session token
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted token
    ///
    /// Missing and malformed files both yield `None`, which sends the
    /// lifecycle down the interactive login path.
    pub async fn read(&self) -> Option<SessionToken> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("No saved session at {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<SessionToken>(&raw) {
            Ok(token) if token.as_value().is_object() => Some(token),
            Ok(_) => {
                warn!("Saved session at {} is not a JSON object", self.path.display());
                None
            }
            Err(e) => {
                warn!("Saved session at {} is malformed: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Overwrite the persisted token
    pub async fn write(&self, token: &SessionToken) -> Result<()> {
        let json = serde_json::to_vec(token)?;
        write_atomic(&self.path, &json).await
    }
}
