// backuprestore/src/restore/extract.rs
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;
use zip::ZipArchive;

use crate::archive::ArchiveFormat;
use crate::errors::{RestoreError, Result};

/// What extraction did at one destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    Created,
    Replaced,
    CreatedDir,
}

impl fmt::Display for EntryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntryAction::Created => "created",
            EntryAction::Replaced => "replaced",
            EntryAction::CreatedDir => "directory",
        };
        f.write_str(label)
    }
}

/// A staged archive that has been opened successfully.
pub enum OpenedArchive {
    Zip(ZipArchive<File>),
    TarGz(PathBuf),
}

fn tar_reader(path: &Path) -> io::Result<tar::Archive<GzDecoder<File>>> {
    Ok(tar::Archive::new(GzDecoder::new(File::open(path)?)))
}

/// Walks every tar header once without writing anything.
fn scan_tar_gz(path: &Path) -> io::Result<usize> {
    let mut archive = tar_reader(path)?;
    let mut count = 0;
    for entry in archive.entries()? {
        entry?.path()?;
        count += 1;
    }
    Ok(count)
}

/// Opens the staged file as `format`; anything unreadable is a corrupt archive.
pub fn open_staged(staged: &Path, key: &str, format: ArchiveFormat) -> Result<OpenedArchive> {
    let corrupt = |cause: String| RestoreError::CorruptArchive {
        key: key.to_string(),
        cause,
    };
    let file = File::open(staged).map_err(|e| RestoreError::io(staged, e))?;

    match format {
        ArchiveFormat::Zip => {
            let archive = ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;
            debug!(key, entries = archive.len(), "Opened zip archive");
            Ok(OpenedArchive::Zip(archive))
        }
        ArchiveFormat::TarGz => {
            drop(file);
            let entries = scan_tar_gz(staged).map_err(|e| corrupt(e.to_string()))?;
            debug!(key, entries, "Scanned tar.gz archive");
            Ok(OpenedArchive::TarGz(staged.to_path_buf()))
        }
    }
}

/// Rejects absolute paths and anything that climbs out of the destination.
/// The archive root (`./`) normalizes to an empty path.
fn safe_relative_path(name: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn unsafe_entry(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("entry {} escapes the destination directory", name),
    )
}

/// Deletes whatever file is at `target`, then writes `contents` there.
fn write_file_entry(target: &Path, contents: &mut dyn Read) -> io::Result<EntryAction> {
    let action = match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => {
            return Err(io::Error::other(format!(
                "{} is an existing directory",
                target.display()
            )));
        }
        Ok(_) => {
            fs::remove_file(target)?;
            EntryAction::Replaced
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => EntryAction::Created,
        Err(e) => return Err(e),
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    io::copy(contents, &mut out)?;
    out.sync_all()?;
    Ok(action)
}

/// Accumulates per-entry results and turns failures into `ExtractionFailed`.
struct Extraction<'a> {
    destination: &'a Path,
    staging_path: &'a Path,
    entries: Vec<(PathBuf, EntryAction)>,
}

impl<'a> Extraction<'a> {
    fn new(destination: &'a Path, staging_path: &'a Path) -> Self {
        Self {
            destination,
            staging_path,
            entries: Vec::new(),
        }
    }

    fn fail(&self, entry: impl Into<String>, source: io::Error) -> RestoreError {
        RestoreError::ExtractionFailed {
            entry: entry.into(),
            written: self.entries.len(),
            source,
        }
    }

    fn record(&mut self, relative: PathBuf, action: EntryAction) {
        debug!(
            "extracted {} to {} ({})",
            relative.display(),
            self.destination.join(&relative).display(),
            action
        );
        self.entries.push((relative, action));
    }

    fn directory(&mut self, name: &str, relative: PathBuf) -> Result<()> {
        if relative.as_os_str().is_empty() {
            debug!(entry = name, "Skipping archive root entry");
            return Ok(());
        }
        fs::create_dir_all(self.destination.join(&relative)).map_err(|e| self.fail(name, e))?;
        self.record(relative, EntryAction::CreatedDir);
        Ok(())
    }

    fn file(&mut self, name: &str, relative: PathBuf, contents: &mut dyn Read) -> Result<()> {
        if relative.as_os_str().is_empty() {
            return Err(self.fail(
                name,
                io::Error::new(io::ErrorKind::InvalidData, "file entry has an empty path"),
            ));
        }
        let target = self.destination.join(&relative);
        // The staged archive lives in the destination while it is being read.
        if target == self.staging_path {
            return Err(self.fail(
                name,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("entry {} would overwrite the staged archive", name),
                ),
            ));
        }
        let action = write_file_entry(&target, contents).map_err(|e| self.fail(name, e))?;
        self.record(relative, action);
        Ok(())
    }
}

fn extract_zip(archive: &mut ZipArchive<File>, extraction: &mut Extraction<'_>) -> Result<()> {
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| extraction.fail(format!("#{}", i), io::Error::from(e)))?;
        let name = file.name().to_string();
        let relative = file
            .enclosed_name()
            .and_then(|p| safe_relative_path(&p))
            .ok_or_else(|| extraction.fail(name.as_str(), unsafe_entry(&name)))?;

        if file.is_dir() {
            extraction.directory(&name, relative)?;
        } else {
            extraction.file(&name, relative, &mut file)?;
        }
    }
    Ok(())
}

fn extract_tar_gz(staged: &Path, extraction: &mut Extraction<'_>) -> Result<()> {
    let mut archive = tar_reader(staged).map_err(|e| RestoreError::io(staged, e))?;
    let entries = archive
        .entries()
        .map_err(|e| extraction.fail("#0", e))?;

    for (i, entry) in entries.enumerate() {
        let mut entry = entry.map_err(|e| extraction.fail(format!("#{}", i), e))?;
        let name = entry
            .path()
            .map_err(|e| extraction.fail(format!("#{}", i), e))?
            .to_string_lossy()
            .into_owned();

        let entry_type = entry.header().entry_type();
        let relative = safe_relative_path(Path::new(&name))
            .ok_or_else(|| extraction.fail(name.as_str(), unsafe_entry(&name)))?;

        if entry_type.is_dir() {
            extraction.directory(&name, relative)?;
        } else if entry_type.is_file() {
            extraction.file(&name, relative, &mut entry)?;
        } else {
            return Err(extraction.fail(
                name.as_str(),
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported entry type {:?}", entry_type),
                ),
            ));
        }
    }
    Ok(())
}

/// Extracts every entry, in archive order, into `destination`.
///
/// Existing files at entry paths are deleted before being rewritten; files
/// not named by the archive are left alone. An entry that resolves to
/// `staging_path` fails extraction. A failure at entry k leaves entries
/// before k written and the rest untouched.
pub fn extract_archive(
    archive: OpenedArchive,
    destination: &Path,
    staging_path: &Path,
) -> Result<Vec<(PathBuf, EntryAction)>> {
    let mut extraction = Extraction::new(destination, staging_path);
    match archive {
        OpenedArchive::Zip(mut zip) => extract_zip(&mut zip, &mut extraction)?,
        OpenedArchive::TarGz(staged) => extract_tar_gz(&staged, &mut extraction)?,
    }
    Ok(extraction.entries)
}
