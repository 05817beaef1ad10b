//! # Staging and Bounded-Safe Extraction
//!
//! Uploaded files are written into randomly named staging directories under
//! the service's working directory. The returned [`StagedFile`] owns its
//! directory and removes it when dropped, so every exit path of an ingestion
//! cleans up after itself.
//!
//! [`extract_bounded`] unpacks a zip-format package archive while enforcing
//! an entry-count ceiling, a cumulative uncompressed byte ceiling, and path
//! containment under the extraction root. Any violation aborts the whole
//! extraction and purges the root.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::validation::{admit_file, FileProfile};

/// Unix file-type bits for a symbolic link.
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Default entry-count ceiling for a package archive
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Default cumulative uncompressed byte ceiling (10 GiB)
pub const DEFAULT_MAX_UNPACKED_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Hard bounds applied while unpacking an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    pub max_entries: usize,
    pub max_total_bytes: u64,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_total_bytes: DEFAULT_MAX_UNPACKED_BYTES,
        }
    }
}

/// Why an archive was refused during extraction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionViolation {
    #[error("archive holds more than {limit} entries")]
    TooManyEntries { limit: usize },

    #[error("archive expands beyond {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("entry '{entry}' resolves outside the extraction root")]
    PathEscape { entry: String },

    #[error("entry '{entry}' is a symbolic link")]
    SymbolicLink { entry: String },

    #[error("entry '{entry}' appears more than once")]
    DuplicateEntry { entry: String },

    #[error("unreadable archive: {reason}")]
    Corrupt { reason: String },
}

/// Totals reported by a completed extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractionSummary {
    pub entries: usize,
    pub files: usize,
    pub total_bytes: u64,
}

/// A validated upload written into its own staging directory.
#[derive(Debug)]
pub struct StagedFile {
    dir: TempDir,
    path: PathBuf,
    file_name: String,
    size: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Create a fresh, randomly named scratch directory under `root`.
pub fn scoped_dir(root: &Path, prefix: &str) -> AppResult<TempDir> {
    fs::create_dir_all(root)?;
    let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(root)?;
    debug!(dir = %dir.path().display(), "Created scoped staging directory");
    Ok(dir)
}

/// Admit `data` under `profile` and write it to a new staging directory.
///
/// Nothing touches the disk when admission fails.
pub fn stage_bytes(
    staging_root: &Path,
    profile: &FileProfile,
    file_name: &str,
    data: &[u8],
) -> AppResult<StagedFile> {
    let admitted = admit_file(profile, file_name, data.len() as u64).map_err(|source| {
        warn!(file = %file_name, kind = profile.kind.as_str(), error = %source, "Upload rejected");
        AppError::Validation {
            file: file_name.to_string(),
            source,
        }
    })?;

    let dir = scoped_dir(staging_root, "upload-")?;
    let path = dir.path().join(&admitted);
    fs::write(&path, data)?;
    info!(
        file = %admitted,
        size = data.len(),
        staging = %dir.path().display(),
        "Upload staged"
    );

    Ok(StagedFile {
        dir,
        path,
        file_name: admitted,
        size: data.len() as u64,
    })
}

/// Admit a file that is already on disk (e.g. downloaded from a peer).
pub fn admit_existing(profile: &FileProfile, file_name: &str, path: &Path) -> AppResult<String> {
    let size = fs::metadata(path)?.len();
    admit_file(profile, file_name, size).map_err(|source| AppError::Validation {
        file: file_name.to_string(),
        source,
    })
}

/// Unpack the zip-format archive at `archive` into `dest` under `limits`.
///
/// `dest` must not exist yet or be empty. On any failure `dest` is removed
/// entirely before the error is returned.
pub fn extract_bounded(
    archive: &Path,
    dest: &Path,
    limits: &ExtractionLimits,
) -> AppResult<ExtractionSummary> {
    let archive_name = archive.display().to_string();
    match extract_inner(archive, dest, limits) {
        Ok(summary) => {
            info!(
                archive = %archive_name,
                entries = summary.entries,
                bytes = summary.total_bytes,
                "Archive extracted"
            );
            Ok(summary)
        }
        Err(err) => {
            purge(dest);
            match err {
                ExtractError::Violation(violation) => {
                    warn!(archive = %archive_name, violation = %violation, "Extraction aborted");
                    Err(AppError::ExtractionRejected {
                        archive: archive_name,
                        violation,
                    })
                }
                ExtractError::Io(e) => Err(AppError::Io(e)),
            }
        }
    }
}

enum ExtractError {
    Violation(ExtractionViolation),
    Io(io::Error),
}

impl From<io::Error> for ExtractError {
    fn from(e: io::Error) -> Self {
        ExtractError::Io(e)
    }
}

impl From<ExtractionViolation> for ExtractError {
    fn from(v: ExtractionViolation) -> Self {
        ExtractError::Violation(v)
    }
}

fn corrupt(e: zip::result::ZipError) -> ExtractError {
    ExtractError::Violation(ExtractionViolation::Corrupt {
        reason: e.to_string(),
    })
}

fn extract_inner(
    archive: &Path,
    dest: &Path,
    limits: &ExtractionLimits,
) -> Result<ExtractionSummary, ExtractError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(corrupt)?;

    if zip.len() > limits.max_entries {
        return Err(ExtractionViolation::TooManyEntries {
            limit: limits.max_entries,
        }
        .into());
    }

    fs::create_dir_all(dest)?;
    let root = dest.canonicalize()?;
    let mut summary = ExtractionSummary::default();

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(corrupt)?;
        summary.entries += 1;
        if summary.entries > limits.max_entries {
            return Err(ExtractionViolation::TooManyEntries {
                limit: limits.max_entries,
            }
            .into());
        }

        let name = entry.name().to_string();
        let relative = contained_relative_path(&name)?;
        if entry.enclosed_name().is_none() {
            return Err(ExtractionViolation::PathEscape { entry: name }.into());
        }

        if entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
        {
            return Err(ExtractionViolation::SymbolicLink { entry: name }.into());
        }

        if entry.is_dir() {
            let dir = root.join(&relative);
            fs::create_dir_all(&dir)?;
            ensure_within(&root, &dir.canonicalize()?, &name)?;
            continue;
        }

        let remaining = limits.max_total_bytes - summary.total_bytes;
        if entry.size() > remaining {
            return Err(ExtractionViolation::TooLarge {
                limit: limits.max_total_bytes,
            }
            .into());
        }

        let target = root.join(&relative);
        let parent = target.parent().unwrap_or(root.as_path());
        fs::create_dir_all(parent)?;
        let parent = parent.canonicalize()?;
        ensure_within(&root, &parent, &name)?;
        let file_name = target
            .file_name()
            .ok_or_else(|| ExtractionViolation::PathEscape {
                entry: name.clone(),
            })?;
        let target = parent.join(file_name);

        let mut out = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ExtractionViolation::DuplicateEntry { entry: name }.into());
            }
            Err(e) => return Err(e.into()),
        };

        // Declared sizes can lie; cap the actual copy one byte past the budget.
        let written = io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out)?;
        if written > remaining {
            return Err(ExtractionViolation::TooLarge {
                limit: limits.max_total_bytes,
            }
            .into());
        }
        summary.total_bytes += written;
        summary.files += 1;
    }

    Ok(summary)
}

/// Turn a raw entry name into a relative path that cannot climb out of the root.
fn contained_relative_path(name: &str) -> Result<PathBuf, ExtractionViolation> {
    let escape = || ExtractionViolation::PathEscape {
        entry: name.to_string(),
    };

    if name.contains('\0') {
        return Err(escape());
    }

    let unified = name.replace('\\', "/");
    if unified.starts_with('/') || unified.as_bytes().get(1) == Some(&b':') {
        return Err(escape());
    }

    let mut relative = PathBuf::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(escape()),
            other => relative.push(other),
        }
    }

    if relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(escape());
    }

    Ok(relative)
}

fn ensure_within(root: &Path, resolved: &Path, entry: &str) -> Result<(), ExtractionViolation> {
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(ExtractionViolation::PathEscape {
            entry: entry.to_string(),
        })
    }
}

fn purge(dest: &Path) {
    if dest.exists() {
        if let Err(e) = fs::remove_dir_all(dest) {
            warn!(dir = %dest.display(), error = %e, "Failed to purge extraction root");
        }
    }
}
