//! Deletion of history entries, locally and at the destination.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind as IoErrorKind;

use capshare_common::{Error, Result, ShareResponse};

use crate::destination::UrlOpener;
use crate::registry::DestinationRegistry;
use crate::settings::SettingsStore;

/// A share as recorded in the caller's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub share: ShareResponse,
    #[serde(default)]
    pub local_deleted: bool,
    #[serde(default)]
    pub remote_deleted: bool,
}

impl HistoryEntry {
    pub fn new(share: ShareResponse) -> Self {
        Self {
            share,
            local_deleted: false,
            remote_deleted: false,
        }
    }
}

/// Which copies of a shared file to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTarget {
    Local,
    Remote,
    Both,
}

impl DeleteTarget {
    fn includes_local(self) -> bool {
        matches!(self, DeleteTarget::Local | DeleteTarget::Both)
    }

    fn includes_remote(self) -> bool {
        matches!(self, DeleteTarget::Remote | DeleteTarget::Both)
    }
}

/// Delete the requested copies of `entry`, updating its flags as each side
/// succeeds.
///
/// Sides already marked deleted are skipped. The remote copy goes first; a
/// local file that no longer exists counts as deleted.
///
/// # Errors
/// - Destination delete failure (flags of the remote side unchanged)
/// - Local file removal failure (user error)
pub async fn delete_history_entry(
    registry: &DestinationRegistry,
    entry: &mut HistoryEntry,
    target: DeleteTarget,
    store: &dyn SettingsStore,
    opener: &dyn UrlOpener,
) -> Result<()> {
    if target.includes_remote() && !entry.remote_deleted {
        registry.delete(&entry.share, store, opener).await?;
        entry.remote_deleted = true;
    }

    if target.includes_local() && !entry.local_deleted {
        match tokio::fs::remove_file(&entry.share.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                tracing::debug!(path = %entry.share.path.display(), "Local file already gone");
            }
            Err(e) => {
                return Err(Error::user(format!(
                    "Failed to delete {}",
                    entry.share.path.display()
                ))
                .with_cause(e))
            }
        }
        entry.local_deleted = true;
    }

    Ok(())
}
