pub(crate) mod extract; // Verify-openable and entry-by-entry extraction
pub(crate) mod selector; // Latest-backup selection with the ordering check
pub(crate) mod stage; // Staging download and staging-file hygiene

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::archive::{ArchiveFormat, file_sha256};
use crate::config::{RunPaths, StorageConfig};
use crate::errors::{RestoreError, Result};
use crate::store::{BackupObject, ObjectStore, collect_listing, sanitize_prefix};

pub use extract::EntryAction;

/// Report of a completed restore.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub key: String,
    pub bytes: u64,
    pub archive_sha256: String,
    pub entries: Vec<(PathBuf, EntryAction)>,
}

/// Downloads, verifies and extracts one selected backup into the
/// destination directory.
pub struct RestoreExecutor<'a> {
    store: &'a dyn ObjectStore,
    paths: &'a RunPaths,
    timeout: Option<Duration>,
}

impl<'a> RestoreExecutor<'a> {
    pub fn new(store: &'a dyn ObjectStore, paths: &'a RunPaths, timeout: Option<Duration>) -> Self {
        Self {
            store,
            paths,
            timeout,
        }
    }

    pub async fn restore(&self, selected: &BackupObject) -> Result<RestoreOutcome> {
        let format = ArchiveFormat::from_key(&selected.key).ok_or_else(|| {
            RestoreError::UnrecognizedObject {
                key: selected.key.clone(),
            }
        })?;
        let destination = &self.paths.destination_dir;
        std::fs::create_dir_all(destination).map_err(|e| RestoreError::io(destination, e))?;

        for other in ArchiveFormat::ALL.iter().filter(|f| **f != format) {
            let stale = self.paths.staging_path(other.suffix());
            if stage::remove_staging_file(&stale)? {
                warn!(path = %stale.display(), "Removed stale staging file from a previous run");
            }
        }

        let staging_path = self.paths.staging_path(format.suffix());
        let bytes = stage::stage_download(self.store, selected, &staging_path, self.timeout).await?;

        let extracted = Self::verify_and_extract(selected, format, &staging_path, destination);

        // The staging file goes away whether or not extraction succeeded.
        match stage::remove_staging_file(&staging_path) {
            Ok(_) => debug!(path = %staging_path.display(), "Removed staging file"),
            Err(e) if extracted.is_ok() => return Err(e),
            Err(e) => warn!(error = %e, "Failed to remove staging file after failed extraction"),
        }

        let (archive_sha256, entries) = extracted?;
        info!(key = %selected.key, entries = entries.len(), "Restore complete");
        Ok(RestoreOutcome {
            key: selected.key.clone(),
            bytes,
            archive_sha256,
            entries,
        })
    }

    fn verify_and_extract(
        selected: &BackupObject,
        format: ArchiveFormat,
        staging_path: &Path,
        destination: &Path,
    ) -> Result<(String, Vec<(PathBuf, EntryAction)>)> {
        let digest = file_sha256(staging_path).map_err(|e| RestoreError::io(staging_path, e))?;
        info!(key = %selected.key, sha256 = %digest, "Staged archive digest");

        let opened = extract::open_staged(staging_path, &selected.key, format)?;
        let entries = extract::extract_archive(opened, destination, staging_path)?;
        Ok((digest, entries))
    }
}

/// Lists the configured prefix, selects the latest backup and restores it.
pub async fn run_restore_flow(
    store: &dyn ObjectStore,
    storage: &StorageConfig,
    paths: &RunPaths,
) -> Result<RestoreOutcome> {
    let prefix = sanitize_prefix(&storage.prefix);
    info!("Listing files in {}{}", store.location(), prefix);
    let objects = collect_listing(store, &prefix, storage.timeout).await?;

    let candidates = objects.len();
    let latest = selector::select_latest(objects)?;
    info!("{} archive files", candidates);
    info!("Restoring backup files from {}", latest.key);

    RestoreExecutor::new(store, paths, storage.timeout)
        .restore(&latest)
        .await
}
