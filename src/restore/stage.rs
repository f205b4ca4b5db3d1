// backuprestore/src/restore/stage.rs
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::{RestoreError, Result};
use crate::store::{BackupObject, ObjectStore, with_timeout};

/// Deletes the staging file if present. Returns whether a file was removed.
pub fn remove_staging_file(staging_path: &Path) -> Result<bool> {
    match std::fs::remove_file(staging_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(RestoreError::io(staging_path, e)),
    }
}

/// Downloads `object` to `staging_path`, replacing whatever a previous run
/// left there. A failed download leaves no staging file behind.
pub async fn stage_download(
    store: &dyn ObjectStore,
    object: &BackupObject,
    staging_path: &Path,
    timeout: Option<Duration>,
) -> Result<u64> {
    if remove_staging_file(staging_path)? {
        warn!(path = %staging_path.display(), "Removed stale staging file from a previous run");
    }

    let operation = format!("download of {}", object.key);
    let downloaded = with_timeout(timeout, &operation, store.download(&object.key, staging_path)).await;

    match downloaded {
        Ok(bytes) => {
            info!(key = %object.key, bytes, path = %staging_path.display(), "Staged archive");
            Ok(bytes)
        }
        Err(e) => {
            if let Err(cleanup) = remove_staging_file(staging_path) {
                warn!(error = %cleanup, "Failed to remove partial staging file");
            }
            Err(e)
        }
    }
}
