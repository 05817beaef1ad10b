//! Local file store for release artifacts.
//!
//! Files live under `<data_dir>/packages/<package_id>/<file_name>`. A
//! [`FileHandle`] is the relative part of that path; handles are validated
//! on every access so a tampered record cannot reach outside the data root.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::types::PackageId;
use crate::validation::validate_safe_path;

const PACKAGES_DIR: &str = "packages";

/// Opaque reference to a stored file, relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHandle(String);

impl FileHandle {
    fn for_package(package_id: &PackageId, file_name: &str) -> Self {
        Self(format!("{PACKAGES_DIR}/{package_id}/{file_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment, i.e. the admitted upload name.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex SHA-256 of a file, read incrementally.
pub fn sha256_file(path: &Path) -> AppResult<String> {
    use sha2::{Digest, Sha256};
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Storage boundary for release artifacts.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist `data` as `file_name` under the package's directory.
    async fn store(&self, package_id: &PackageId, file_name: &str, data: Bytes)
        -> AppResult<FileHandle>;

    /// Copy an already staged file into the store.
    async fn store_file(
        &self,
        package_id: &PackageId,
        file_name: &str,
        source: &Path,
    ) -> AppResult<FileHandle>;

    async fn retrieve(&self, handle: &FileHandle) -> AppResult<Bytes>;

    async fn delete(&self, handle: &FileHandle) -> AppResult<()>;

    /// Remove everything stored for a package.
    async fn delete_package(&self, package_id: &PackageId) -> AppResult<()>;
}

/// [`FileStore`] backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a handle after validating it.
    pub fn resolve(&self, handle: &FileHandle) -> AppResult<PathBuf> {
        let relative = validate_safe_path(handle.as_str()).map_err(|source| {
            warn!(handle = %handle, error = %source, "Refusing unsafe file handle");
            AppError::Validation {
                file: handle.to_string(),
                source,
            }
        })?;
        Ok(self.root.join(relative))
    }

    fn prepare(&self, package_id: &PackageId, file_name: &str) -> AppResult<(FileHandle, PathBuf)> {
        let handle = FileHandle::for_package(package_id, file_name);
        let path = self.resolve(&handle)?;
        Ok((handle, path))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn store(
        &self,
        package_id: &PackageId,
        file_name: &str,
        data: Bytes,
    ) -> AppResult<FileHandle> {
        let (handle, path) = self.prepare(package_id, file_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;
        info!(handle = %handle, size = data.len(), "File stored");
        Ok(handle)
    }

    async fn store_file(
        &self,
        package_id: &PackageId,
        file_name: &str,
        source: &Path,
    ) -> AppResult<FileHandle> {
        let (handle, path) = self.prepare(package_id, file_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let size = fs::copy(source, &path).await?;
        info!(handle = %handle, size = size, "File stored");
        Ok(handle)
    }

    async fn retrieve(&self, handle: &FileHandle) -> AppResult<Bytes> {
        let path = self.resolve(handle)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(handle = %handle, "Stored file missing");
                Err(AppError::NotFound(format!("File not found: {handle}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, handle: &FileHandle) -> AppResult<()> {
        let path = self.resolve(handle)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(handle = %handle, "File deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_package(&self, package_id: &PackageId) -> AppResult<()> {
        let dir = self.root.join(PACKAGES_DIR).join(
            validate_safe_path(package_id.as_str()).map_err(|source| AppError::Validation {
                file: package_id.to_string(),
                source,
            })?,
        );
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(package_id = %package_id, "Package files removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
