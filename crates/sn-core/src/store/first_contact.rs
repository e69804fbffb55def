//! First-contact set: contacts that already received the one-time attachment

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::write_atomic;
use crate::Result;

/// Contact identifier -> "attachment already sent", mirrored to a JSON file
///
/// Entries only ever move to `true`. The mutex covers the whole
/// read-modify-persist sequence in [`FirstContactSet::mark_sent`].
#[derive(Debug)]
pub struct FirstContactSet {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, bool>>,
}

impl FirstContactSet {
    /// Empty set bound to `path` (nothing is read or written)
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load the set from `path`
    ///
    /// A missing file is created holding an empty mapping. Unreadable or
    /// malformed files are logged and the set starts empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let set = Self::empty(path);

        match tokio::fs::read(&set.path).await {
            Ok(raw) => match serde_json::from_slice::<BTreeMap<String, bool>>(&raw) {
                Ok(entries) => {
                    info!(
                        "Loaded {} first-contact entries from {}",
                        entries.len(),
                        set.path.display()
                    );
                    *set.entries.lock().await = entries;
                }
                Err(e) => {
                    error!("Error deserializing {}: {}", set.path.display(), e);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, creating it", set.path.display());
                if let Err(e) = set.persist(&BTreeMap::new()).await {
                    error!("Error serializing {}: {}", set.path.display(), e);
                }
            }
            Err(e) => {
                warn!("Cannot read {}: {}", set.path.display(), e);
            }
        }

        set
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the contact is absent or explicitly `false`
    pub async fn needs_attachment(&self, contact: &str) -> bool {
        !self.entries.lock().await.get(contact).copied().unwrap_or(false)
    }

    /// Mark `contact` as sent and persist the whole set immediately
    ///
    /// The in-memory flag is set even when persisting fails.
    pub async fn mark_sent(&self, contact: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(contact.to_string(), true);
        self.persist(&entries).await
    }

    /// Copy of the current mapping
    pub async fn snapshot(&self) -> BTreeMap<String, bool> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn persist(&self, entries: &BTreeMap<String, bool>) -> Result<()> {
        let json = serde_json::to_vec(entries)?;
        write_atomic(&self.path, &json).await
    }
}
