//! Local state persistence
//!
//! Two small JSON artifacts: the first-contact set and the session token.

mod first_contact;
mod session;

pub use first_contact::FirstContactSet;
pub use session::SessionStore;

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::Result;

/// Write `bytes` to `path` via a sibling temp file, fsync, then rename
///
/// Parent directories are created as needed.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
