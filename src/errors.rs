use std::path::PathBuf;

use thiserror::Error;

use crate::store::BackupObject;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("config.json not found in any of: {}", display_paths(.candidates))]
    ConfigNotFound { candidates: Vec<PathBuf> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Object store unavailable during {operation}: {cause}")]
    StoreUnavailable { operation: String, cause: String },

    #[error("{key} is an unrecognized object in the backup store")]
    UnrecognizedObject { key: String },

    #[error("No backups found")]
    NoBackupsFound,

    #[error(
        "Inconsistency in backup set: latest by name is {} (modified {}), latest by time is {} (modified {})",
        .by_name.key, .by_name.last_modified, .by_time.key, .by_time.last_modified
    )]
    InconsistentBackupSet {
        by_name: BackupObject,
        by_time: BackupObject,
    },

    #[error("Corrupt archive {key}: {cause}")]
    CorruptArchive { key: String, cause: String },

    #[error("Extraction failed at entry {entry} after {written} entries written: {source}")]
    ExtractionFailed {
        entry: String,
        written: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RestoreError {
    pub fn store(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        RestoreError::StoreUnavailable {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RestoreError::LocalIo {
            path: path.into(),
            source,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, RestoreError>;
