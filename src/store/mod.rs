//! Object store access: the read-only backup lister plus whole-object
//! download and upload.
//!
//! Callers receive an explicitly constructed store (`S3Store` in production,
//! `MemoryStore` in tests); nothing here caches a client globally.

pub(crate) mod s3;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use futures::stream::BoxStream;
use tracing::debug;

use crate::errors::{RestoreError, Result};

pub use s3::S3Store;

/// One archive candidate as reported by the store listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl BackupObject {
    pub fn new(key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
        }
    }

    /// The last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human readable location of the bucket, used in reports.
    fn location(&self) -> String;

    /// Lazily lists every object under `prefix`. Ordering is storage-defined.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<BackupObject>>;

    /// Downloads the whole object into `destination`, returning the byte count.
    async fn download(&self, key: &str, destination: &Path) -> Result<u64>;

    /// Uploads a local file under `key`.
    async fn upload(&self, source: &Path, key: &str) -> Result<()>;
}

/// Removes a leading `/` and appends a trailing `/` when missing.
///
/// An empty prefix stays empty so the whole bucket is listed.
pub fn sanitize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

/// Runs a store operation under an optional deadline. Expiry is reported as
/// the store being unavailable.
pub async fn with_timeout<T, F>(timeout: Option<Duration>, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            RestoreError::store(operation, format!("timed out after {} seconds", limit.as_secs()))
        })?,
        None => fut.await,
    }
}

/// Drains the listing for `prefix` into memory.
pub async fn collect_listing(
    store: &dyn ObjectStore,
    prefix: &str,
    timeout: Option<Duration>,
) -> Result<Vec<BackupObject>> {
    let objects: Vec<BackupObject> =
        with_timeout(timeout, "list", store.list(prefix).try_collect()).await?;
    debug!(prefix, count = objects.len(), "Listing complete");
    Ok(objects)
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sanitize_prefix() {
        assert_eq!(sanitize_prefix("apptranslator"), "apptranslator/");
        assert_eq!(sanitize_prefix("/apptranslator"), "apptranslator/");
        assert_eq!(sanitize_prefix("apptranslator/"), "apptranslator/");
        assert_eq!(sanitize_prefix("a/b"), "a/b/");
        assert_eq!(sanitize_prefix(""), "");
        assert_eq!(sanitize_prefix("/"), "");
    }

    #[test]
    fn test_file_name() {
        let obj = BackupObject::new("apptranslator/2024-01-01.zip", 1, Utc::now());
        assert_eq!(obj.file_name(), "2024-01-01.zip");
        let bare = BackupObject::new("top.zip", 1, Utc::now());
        assert_eq!(bare.file_name(), "top.zip");
    }

    #[tokio::test]
    async fn test_collect_listing_filters_by_prefix() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.insert("apptranslator/a.zip", vec![1, 2, 3], Utc.timestamp_opt(100, 0).unwrap());
        store.insert("other/b.zip", vec![1], Utc.timestamp_opt(200, 0).unwrap());

        let objects = collect_listing(&store, "apptranslator/", None).await?;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "apptranslator/a.zip");
        assert_eq!(objects[0].size, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_listing_failure_is_store_unavailable() {
        let store = MemoryStore::new().failing_listing();
        let err = collect_listing(&store, "apptranslator/", None).await.unwrap_err();
        assert!(matches!(err, RestoreError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let err = with_timeout(Some(Duration::from_millis(10)), "list", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        match err {
            RestoreError::StoreUnavailable { operation, cause } => {
                assert_eq!(operation, "list");
                assert!(cause.contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
