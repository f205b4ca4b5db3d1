// backuprestore/src/archive/mod.rs
//! Archive formats recognized in the backup store, and creation of new
//! archives from a directory tree.

use anyhow::{Context, Result};
use chrono::{Datelike, Timelike, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 2] = [ArchiveFormat::Zip, ArchiveFormat::TarGz];

    /// Recognizes a backup by its key suffix.
    pub fn from_key(key: &str) -> Option<Self> {
        if key.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if key.ends_with(".tar.gz") || key.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::TarGz => ".tar.gz",
        }
    }
}

/// Regular files under `source_dir`, paired with their `/`-separated names
/// relative to it. Directories are not returned.
fn files_to_archive(source_dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    if !source_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Source for archival is not a directory: {}",
            source_dir.display()
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = path.strip_prefix(source_dir).with_context(|| {
            format!(
                "Failed to strip prefix {} from {}",
                source_dir.display(),
                path.display()
            )
        })?;
        let name = name
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((path.to_path_buf(), name));
    }
    Ok(files)
}

/// The file's modification time as a zip timestamp, so unchanged trees
/// produce byte-identical archives.
fn zip_timestamp(path: &Path) -> zip::DateTime {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => chrono::DateTime::<Utc>::from(modified),
        Err(_) => return zip::DateTime::default(),
    };
    zip::DateTime::from_date_and_time(
        u16::try_from(modified.year()).unwrap_or(0),
        modified.month() as u8,
        modified.day() as u8,
        modified.hour() as u8,
        modified.minute() as u8,
        modified.second() as u8,
    )
    .unwrap_or_default()
}

fn create_parent_dir(archive_dest_path: &Path) -> Result<()> {
    if let Some(parent) = archive_dest_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create parent directory for archive: {}",
                    parent.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Creates a zip archive of every file in `source_dir`.
///
/// Entry names are relative to `source_dir`: `source_dir/foo/bar.txt` is
/// stored as `foo/bar.txt`. Returns the number of files added.
pub fn create_zip_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<usize> {
    let files = files_to_archive(source_dir)?;
    create_parent_dir(archive_dest_path)?;

    info!(
        source = %source_dir.display(),
        archive = %archive_dest_path.display(),
        "Creating zip archive"
    );

    let archive_file = File::create(archive_dest_path).with_context(|| {
        format!("Failed to create archive file: {}", archive_dest_path.display())
    })?;
    let mut writer = ZipWriter::new(archive_file);

    for (path, name) in &files {
        writer
            .start_file(
                name.as_str(),
                SimpleFileOptions::default().last_modified_time(zip_timestamp(path)),
            )
            .with_context(|| format!("Failed to start zip entry {}", name))?;
        let mut source = File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        io::copy(&mut source, &mut writer)
            .with_context(|| format!("Failed to add {} to archive", path.display()))?;
        debug!(entry = %name, "Added file to zip");
    }

    writer.finish().with_context(|| {
        format!("Failed to finish zip archive: {}", archive_dest_path.display())
    })?;

    info!(files = files.len(), archive = %archive_dest_path.display(), "Zip archive created");
    Ok(files.len())
}

/// Creates a gzipped tar archive of every file in `source_dir`, with the
/// same entry naming as [`create_zip_archive`].
pub fn create_tar_gz_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<usize> {
    let files = files_to_archive(source_dir)?;
    create_parent_dir(archive_dest_path)?;

    info!(
        source = %source_dir.display(),
        archive = %archive_dest_path.display(),
        "Creating tar.gz archive"
    );

    let archive_file = File::create(archive_dest_path).with_context(|| {
        format!("Failed to create archive file: {}", archive_dest_path.display())
    })?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    for (path, name) in &files {
        tar_builder.append_path_with_name(path, name).with_context(|| {
            format!("Failed to append file {} as {} to archive", path.display(), name)
        })?;
        debug!(entry = %name, "Added file to tarball");
    }

    let encoder = tar_builder.into_inner().with_context(|| {
        format!(
            "Failed to get inner encoder from tar builder for archive: {}",
            archive_dest_path.display()
        )
    })?;
    encoder.finish().with_context(|| {
        format!(
            "Failed to finish Gzip encoding for archive: {}",
            archive_dest_path.display()
        )
    })?;

    info!(files = files.len(), archive = %archive_dest_path.display(), "Tar.gz archive created");
    Ok(files.len())
}

/// Creates an archive of `format` from `source_dir`.
pub fn create_archive(format: ArchiveFormat, source_dir: &Path, archive_dest_path: &Path) -> Result<usize> {
    match format {
        ArchiveFormat::Zip => create_zip_archive(source_dir, archive_dest_path),
        ArchiveFormat::TarGz => create_tar_gz_archive(source_dir, archive_dest_path),
    }
}

/// Hex SHA-256 of a file's contents.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
