// backuprestore/src/backup/mod.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::info;

use crate::archive::{ArchiveFormat, create_archive, file_sha256};
use crate::config::StorageConfig;
use crate::errors::RestoreError;
use crate::restore::selector::select_latest;
use crate::store::{BackupObject, ObjectStore, collect_listing, sanitize_prefix, with_timeout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupReport {
    Uploaded { key: String, files: usize },
    /// The latest stored backup already has this content.
    Unchanged { latest: String },
}

/// `<prefix><YYYYMMDD_HHMMSS>_<sha256><suffix>`: lexical order follows upload order.
pub fn backup_key(prefix: &str, at: DateTime<Utc>, sha256: &str, format: ArchiveFormat) -> String {
    format!(
        "{}{}_{}{}",
        sanitize_prefix(prefix),
        at.format("%Y%m%d_%H%M%S"),
        sha256,
        format.suffix()
    )
}

/// Latest stored backup, or `None` when the prefix is empty.
async fn latest_backup(store: &dyn ObjectStore, storage: &StorageConfig) -> Result<Option<BackupObject>> {
    let prefix = sanitize_prefix(&storage.prefix);
    let objects = collect_listing(store, &prefix, storage.timeout).await?;
    match select_latest(objects) {
        Ok(latest) => Ok(Some(latest)),
        Err(RestoreError::NoBackupsFound) => Ok(None),
        Err(e) => Err(e).context("Existing backups are not in a consistent state"),
    }
}

/// Archives `source_dir` and uploads it unless the latest backup already
/// holds identical content.
pub async fn run_backup_flow(
    store: &dyn ObjectStore,
    storage: &StorageConfig,
    source_dir: &Path,
    format: ArchiveFormat,
) -> Result<BackupReport> {
    if !source_dir.is_dir() {
        return Err(RestoreError::io(
            source_dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "directory to back up doesn't exist"),
        )
        .into());
    }

    let staged = tempfile::Builder::new()
        .prefix("backup-")
        .suffix(format.suffix())
        .tempfile()
        .context("Failed to create temporary archive file")?;
    let archive_path = staged.path();

    let files = tokio::task::block_in_place(|| create_archive(format, source_dir, archive_path))?;
    let digest = file_sha256(archive_path)
        .with_context(|| format!("Failed to hash archive {}", archive_path.display()))?;
    info!(sha256 = %digest, files, "Archive ready");

    if let Some(latest) = latest_backup(store, storage).await? {
        if latest.file_name().contains(&digest) {
            info!(key = %latest.key, "Latest backup has identical content, skipping upload");
            return Ok(BackupReport::Unchanged { latest: latest.key });
        }
    }

    let key = backup_key(&storage.prefix, Utc::now(), &digest, format);
    let operation = format!("upload of {}", key);
    with_timeout(storage.timeout, &operation, store.upload(archive_path, &key)).await?;

    staged
        .close()
        .context("Failed to remove temporary archive file")?;
    Ok(BackupReport::Uploaded { key, files })
}
