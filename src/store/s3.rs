// backuprestore/src/store/s3.rs
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use s3::config::Region;
use s3::operation::list_objects_v2::ListObjectsV2Output;
use s3::primitives::ByteStream;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{BackupObject, ObjectStore};
use crate::config::StorageConfig;
use crate::errors::{RestoreError, Result};

/// S3 (or S3-compatible) bucket access through a client built once per run.
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    endpoint_url: Option<String>,
}

impl S3Store {
    /// Builds the SDK client from static credentials.
    pub async fn connect(storage: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(storage.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &storage.access_key,
                &storage.secret_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        if let Some(endpoint) = &storage.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        debug!(bucket = %storage.bucket, region = %storage.region, "Built S3 client");

        Self {
            client: s3::Client::new(&sdk_config),
            bucket: storage.bucket.clone(),
            endpoint_url: storage.endpoint_url.clone(),
        }
    }
}

/// Converts a listing entry; objects without a key or timestamp are store faults.
fn to_backup_object(object: &s3::types::Object) -> Result<BackupObject> {
    let key = object
        .key()
        .ok_or_else(|| RestoreError::store("list", "listing returned an object without a key"))?;
    let modified = object.last_modified().ok_or_else(|| {
        RestoreError::store("list", format!("object {} has no last-modified timestamp", key))
    })?;
    let last_modified = DateTime::<Utc>::from_timestamp(modified.secs(), modified.subsec_nanos())
        .ok_or_else(|| {
            RestoreError::store("list", format!("object {} has an out of range timestamp", key))
        })?;
    let size = object.size().unwrap_or(0).max(0) as u64;
    Ok(BackupObject::new(key, size, last_modified))
}

/// Flattens listing pages into one object stream. A failed page becomes a
/// single `StoreUnavailable` item.
fn objects_from_pages<'a, E>(
    pages: BoxStream<'a, std::result::Result<ListObjectsV2Output, E>>,
) -> BoxStream<'a, Result<BackupObject>>
where
    E: std::fmt::Display + Send + 'a,
{
    pages
        .flat_map(|page| {
            let objects: Vec<Result<BackupObject>> = match page {
                Ok(page) => page.contents().iter().map(to_backup_object).collect(),
                Err(e) => vec![Err(RestoreError::store("list", e))],
            };
            stream::iter(objects)
        })
        .boxed()
}

#[async_trait]
impl ObjectStore for S3Store {
    fn location(&self) -> String {
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}/", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("http://{}.s3.amazonaws.com/", self.bucket),
        }
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<BackupObject>> {
        debug!(bucket = %self.bucket, prefix, "Listing objects");
        let pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let pages = stream::unfold(pages, |mut pages| async move {
            let page = pages.next().await?;
            Some((page.map_err(s3::error::DisplayErrorContext), pages))
        })
        .boxed();
        objects_from_pages(pages)
    }

    async fn download(&self, key: &str, destination: &Path) -> Result<u64> {
        info!(bucket = %self.bucket, key, path = %destination.display(), "Downloading object");

        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                RestoreError::store(format!("download of {}", key), s3::error::DisplayErrorContext(e))
            })?;

        let mut output_file = File::create(destination)
            .await
            .map_err(|e| RestoreError::io(destination, e))?;

        let mut total_bytes_downloaded: u64 = 0;
        while let Some(bytes_chunk) = object
            .body
            .try_next()
            .await
            .map_err(|e| RestoreError::store(format!("download of {}", key), e))?
        {
            output_file
                .write_all(&bytes_chunk)
                .await
                .map_err(|e| RestoreError::io(destination, e))?;
            total_bytes_downloaded += bytes_chunk.len() as u64;
        }
        output_file
            .flush()
            .await
            .map_err(|e| RestoreError::io(destination, e))?;

        info!(key, bytes = total_bytes_downloaded, "Download complete");
        Ok(total_bytes_downloaded)
    }

    async fn upload(&self, source: &Path, key: &str) -> Result<()> {
        info!(bucket = %self.bucket, key, path = %source.display(), "Uploading object");

        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| RestoreError::io(source, std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                RestoreError::store(format!("upload of {}", key), s3::error::DisplayErrorContext(e))
            })?;

        info!(key, "Upload complete");
        Ok(())
    }
}
