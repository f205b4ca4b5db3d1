// backuprestore/src/config/mod.rs
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{RestoreError, Result};

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const DEFAULT_BUCKET: &str = "kjkbackup";
pub const DEFAULT_PREFIX: &str = "apptranslator";
pub const DEFAULT_REGION: &str = "us-east-1";
const DATA_DIR_NAME: &str = "apptranslatordata";
const STAGING_FILE_STEM: &str = "tmp-restore";

// Struct for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawJsonConfig {
    pub aws_access: Option<String>,
    pub aws_secret: Option<String>,
    pub bucket: Option<String>,
    #[serde(rename = "S3BackupDir")]
    pub s3_backup_dir: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Everything needed to talk to the bucket.
#[derive(Clone)]
pub struct StorageConfig {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub prefix: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Local paths for a restore, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub destination_dir: PathBuf,
}

impl RunPaths {
    /// Uses `destination` when given, otherwise `<exe_dir>/../../apptranslatordata`
    /// if that exists, else `exe_dir` itself.
    pub fn resolve(exe_dir: &Path, destination: Option<PathBuf>) -> Self {
        let destination_dir = destination.unwrap_or_else(|| {
            let data_dir = exe_dir.join("..").join("..").join(DATA_DIR_NAME);
            if data_dir.is_dir() {
                data_dir
            } else {
                exe_dir.to_path_buf()
            }
        });
        Self { destination_dir }
    }

    /// Staging file for a download, colocated with the destination.
    pub fn staging_path(&self, suffix: &str) -> PathBuf {
        self.destination_dir
            .join(format!("{}{}", STAGING_FILE_STEM, suffix))
    }
}

/// Candidate config locations: next to the executable, then its parent.
pub fn config_candidates(exe_dir: &Path) -> Vec<PathBuf> {
    vec![
        exe_dir.join(CONFIG_FILE_NAME),
        exe_dir.join("..").join(CONFIG_FILE_NAME),
    ]
}

/// Directory holding the running executable.
pub fn current_exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().map_err(|e| RestoreError::io("current executable", e))?;
    let exe = fs::canonicalize(&exe).unwrap_or(exe);
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

/// Returns the first candidate that exists.
pub fn find_config_path(candidates: &[PathBuf]) -> Result<PathBuf> {
    for candidate in candidates {
        debug!(path = %candidate.display(), "Checking for config file");
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }
    Err(RestoreError::ConfigNotFound {
        candidates: candidates.to_vec(),
    })
}

/// Parses an `s3://bucket/prefix` location override.
pub fn parse_s3_location(location: &str) -> Result<(String, String)> {
    let uri = url::Url::parse(location)
        .map_err(|e| RestoreError::Config(format!("Invalid S3 location {}: {}", location, e)))?;
    if uri.scheme() != "s3" {
        return Err(RestoreError::Config(format!(
            "S3 location must start with s3://, got {}",
            location
        )));
    }
    let bucket = uri
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RestoreError::Config(format!("S3 location missing bucket name: {}", location)))?
        .to_string();
    let prefix = uri.path().trim_start_matches('/').to_string();
    Ok((bucket, prefix))
}

fn required(value: &Option<String>, field: &str, path: &Path) -> Result<String> {
    value
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            RestoreError::Config(format!(
                "{} must be set in {}",
                field,
                path.display()
            ))
        })
}

impl StorageConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content =
            fs::read_to_string(config_path).map_err(|e| RestoreError::io(config_path, e))?;
        Self::from_json_str(&config_content, config_path)
    }

    fn from_json_str(config_content: &str, config_path: &Path) -> Result<Self> {
        let raw: RawJsonConfig = serde_json::from_str(config_content).map_err(|e| {
            RestoreError::Config(format!(
                "Failed to parse JSON from config file at {}: {}",
                config_path.display(),
                e
            ))
        })?;

        let access_key = required(&raw.aws_access, "AwsAccess", config_path)?;
        let secret_key = required(&raw.aws_secret, "AwsSecret", config_path)?;

        let bucket = raw
            .bucket
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        let prefix = raw
            .s3_backup_dir
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        let region = raw
            .region
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint_url = raw.endpoint_url.filter(|s| !s.trim().is_empty());

        let timeout = match raw.timeout_secs {
            Some(0) => {
                warn!("TimeoutSecs of 0 in {} ignored", config_path.display());
                None
            }
            other => other.map(Duration::from_secs),
        };

        Ok(StorageConfig {
            access_key,
            secret_key,
            bucket,
            prefix,
            region,
            endpoint_url,
            timeout,
        })
    }

    /// Applies an `s3://bucket/prefix` override.
    pub fn with_location(mut self, location: &str) -> Result<Self> {
        let (bucket, prefix) = parse_s3_location(location)?;
        self.bucket = bucket;
        self.prefix = prefix;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config_uses_defaults() -> anyhow::Result<()> {
        let config = StorageConfig::from_json_str(
            r#"{"AwsAccess": "AKIA", "AwsSecret": "s3cr3t"}"#,
            Path::new("config.json"),
        )?;
        assert_eq!(config.access_key, "AKIA");
        assert_eq!(config.secret_key, "s3cr3t");
        assert_eq!(config.bucket, DEFAULT_BUCKET);
        assert_eq!(config.prefix, DEFAULT_PREFIX);
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.endpoint_url, None);
        assert_eq!(config.timeout, None);
        Ok(())
    }

    #[test]
    fn test_load_full_config() -> anyhow::Result<()> {
        let config = StorageConfig::from_json_str(
            r#"{
                "AwsAccess": "AKIA",
                "AwsSecret": "s3cr3t",
                "Bucket": "mybucket",
                "S3BackupDir": "backups/app",
                "Region": "eu-west-1",
                "EndpointUrl": "https://nyc3.digitaloceanspaces.com",
                "TimeoutSecs": 30,
                "TwitterOAuthCredentials": {"Token": "ignored"}
            }"#,
            Path::new("config.json"),
        )?;
        assert_eq!(config.bucket, "mybucket");
        assert_eq!(config.prefix, "backups/app");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(
            config.endpoint_url.as_deref(),
            Some("https://nyc3.digitaloceanspaces.com")
        );
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        Ok(())
    }

    #[test]
    fn test_missing_or_empty_secret_is_config_error() {
        let missing = StorageConfig::from_json_str(r#"{"AwsAccess": "AKIA"}"#, Path::new("c.json"));
        assert!(matches!(missing, Err(RestoreError::Config(_))));

        let empty = StorageConfig::from_json_str(
            r#"{"AwsAccess": "AKIA", "AwsSecret": "  "}"#,
            Path::new("c.json"),
        );
        assert!(matches!(empty, Err(RestoreError::Config(_))));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let result = StorageConfig::from_json_str("{not json", Path::new("c.json"));
        assert!(matches!(result, Err(RestoreError::Config(_))));
    }

    #[test]
    fn test_debug_redacts_credentials() -> anyhow::Result<()> {
        let config = StorageConfig::from_json_str(
            r#"{"AwsAccess": "AKIA", "AwsSecret": "s3cr3t"}"#,
            Path::new("config.json"),
        )?;
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cr3t"));
        assert!(!debug.contains("AKIA"));
        Ok(())
    }

    #[test]
    fn test_find_config_prefers_exe_dir_then_parent() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let exe_dir = root.path().join("bin");
        fs::create_dir_all(&exe_dir)?;
        let candidates = config_candidates(&exe_dir);

        let err = find_config_path(&candidates).unwrap_err();
        match err {
            RestoreError::ConfigNotFound { candidates: reported } => assert_eq!(reported.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }

        fs::write(root.path().join(CONFIG_FILE_NAME), "{}")?;
        assert_eq!(find_config_path(&candidates)?, candidates[1]);

        fs::write(exe_dir.join(CONFIG_FILE_NAME), "{}")?;
        assert_eq!(find_config_path(&candidates)?, candidates[0]);
        Ok(())
    }

    #[test]
    fn test_destination_defaults() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let exe_dir = root.path().join("a").join("b");
        fs::create_dir_all(&exe_dir)?;

        let paths = RunPaths::resolve(&exe_dir, None);
        assert_eq!(paths.destination_dir, exe_dir);

        fs::create_dir_all(root.path().join(DATA_DIR_NAME))?;
        let paths = RunPaths::resolve(&exe_dir, None);
        assert_eq!(
            paths.destination_dir,
            exe_dir.join("..").join("..").join(DATA_DIR_NAME)
        );

        let explicit = root.path().join("elsewhere");
        let paths = RunPaths::resolve(&exe_dir, Some(explicit.clone()));
        assert_eq!(paths.destination_dir, explicit);
        assert_eq!(paths.staging_path(".zip"), explicit.join("tmp-restore.zip"));
        Ok(())
    }

    #[test]
    fn test_parse_s3_location() -> anyhow::Result<()> {
        assert_eq!(
            parse_s3_location("s3://kjkbackup/apptranslator")?,
            ("kjkbackup".to_string(), "apptranslator".to_string())
        );
        assert_eq!(
            parse_s3_location("s3://kjkbackup")?,
            ("kjkbackup".to_string(), String::new())
        );
        assert!(parse_s3_location("https://kjkbackup/apptranslator").is_err());
        assert!(parse_s3_location("not a uri").is_err());
        Ok(())
    }
}
