//! # Ingestion Pipeline
//!
//! Turns an archive plus its icon (and optional demo video) into a
//! registered [`Release`] in `Upload` status:
//!
//! 1. admit every file by name, extension and size
//! 2. extract the archive under bounds and introspect it
//! 3. find or create the owning [`App`](crate::models::App)
//! 4. copy the files into the store and checksum the archive
//! 5. insert the release
//!
//! Nothing is committed until step 5; a failure at any step removes what
//! earlier steps wrote.

use bytes::Bytes;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::archive::{admit_existing, stage_bytes, ExtractionLimits, StagedFile};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::introspect::{inspect_archive, IntrospectLimits};
use crate::models::{App, BasicInfo, Release, ReleaseDetails, ReleaseFiles};
use crate::repository::Repository;
use crate::storage::{sha256_file, FileStore};
use crate::types::{AppId, AppStatus, Owner, PackageId, ReleaseStatus};
use crate::validation::FileProfile;

/// A file already on local disk, e.g. staged from an upload or downloaded from a peer.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub path: PathBuf,
}

/// A file received in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub package: IncomingFile,
    pub icon: IncomingFile,
    pub demo: Option<IncomingFile>,
    pub details: ReleaseDetails,
    pub owner: Owner,
    /// Peer store the files came from, if any.
    pub source_store: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub package: UploadedFile,
    pub icon: UploadedFile,
    pub demo: Option<UploadedFile>,
    pub details: ReleaseDetails,
    pub owner: Owner,
}

/// Limits and locations the pipeline runs under.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub staging_root: PathBuf,
    pub package: FileProfile,
    pub icon: FileProfile,
    pub video: FileProfile,
    pub extraction: ExtractionLimits,
    pub introspect: IntrospectLimits,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            staging_root: config.staging_dir(),
            package: config.package_profile(),
            icon: config.icon_profile(),
            video: config.video_profile(),
            extraction: config.extraction_limits(),
            introspect: config.introspect_limits(),
        }
    }
}

pub struct Ingestor {
    repo: Arc<dyn Repository>,
    files: Arc<dyn FileStore>,
    settings: IngestSettings,
}

struct AdmittedFiles {
    package: String,
    icon: String,
    demo: Option<String>,
}

impl Ingestor {
    pub fn new(repo: Arc<dyn Repository>, files: Arc<dyn FileStore>, settings: IngestSettings) -> Self {
        Self {
            repo,
            files,
            settings,
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Stage in-memory uploads and ingest them.
    ///
    /// Rejected files never reach the disk; staged copies are removed once
    /// this returns.
    pub async fn ingest_upload(&self, upload: UploadRequest) -> AppResult<Release> {
        let stage = |profile: &FileProfile, file: &UploadedFile| -> AppResult<StagedFile> {
            stage_bytes(
                &self.settings.staging_root,
                profile,
                &file.file_name,
                &file.data,
            )
        };

        let package = stage(&self.settings.package, &upload.package)?;
        let icon = stage(&self.settings.icon, &upload.icon)?;
        let demo = upload
            .demo
            .as_ref()
            .map(|demo| stage(&self.settings.video, demo))
            .transpose()?;

        let incoming = |staged: &StagedFile| IncomingFile {
            file_name: staged.file_name().to_string(),
            path: staged.path().to_path_buf(),
        };

        self.ingest(IngestRequest {
            package: incoming(&package),
            icon: incoming(&icon),
            demo: demo.as_ref().map(incoming),
            details: upload.details,
            owner: upload.owner,
            source_store: None,
        })
        .await
    }

    fn admit(&self, request: &IngestRequest) -> AppResult<AdmittedFiles> {
        let admit = |profile: &FileProfile, file: &IncomingFile| {
            admit_existing(profile, &file.file_name, &file.path)
        };
        Ok(AdmittedFiles {
            package: admit(&self.settings.package, &request.package)?,
            icon: admit(&self.settings.icon, &request.icon)?,
            demo: request
                .demo
                .as_ref()
                .map(|demo| admit(&self.settings.video, demo))
                .transpose()?,
        })
    }

    /// Extract and introspect off the async runtime.
    async fn inspect(&self, archive: &Path) -> AppResult<(BasicInfo, String)> {
        let archive = archive.to_path_buf();
        let scratch = self.settings.staging_root.clone();
        let extraction = self.settings.extraction;
        let limits = self.settings.introspect;

        tokio::task::spawn_blocking(move || -> AppResult<(BasicInfo, String)> {
            let info = inspect_archive(&archive, &scratch, &extraction, &limits)?;
            let checksum = sha256_file(&archive)?;
            Ok((info, checksum))
        })
        .await
        .map_err(|e| AppError::InternalError(format!("Introspection task failed: {e}")))?
    }

    /// Run the full pipeline over files already on disk.
    pub async fn ingest(&self, request: IngestRequest) -> AppResult<Release> {
        let names = self.admit(&request)?;
        let (info, checksum) = self.inspect(&request.package.path).await?;

        if self
            .repo
            .find_release(&info.app_name, &info.provider, &info.version)
            .await?
            .is_some()
        {
            warn!(
                app_name = %info.app_name,
                provider = %info.provider,
                version = %info.version,
                "Duplicate version rejected"
            );
            return Err(AppError::Conflict(format!(
                "Version {} of {} by {} is already registered",
                info.version, info.app_name, info.provider
            )));
        }

        let candidate = App {
            app_id: AppId::generate(),
            name: info.app_name.clone(),
            provider: info.provider.clone(),
            owner: request.owner.clone(),
            status: AppStatus::Unpublished,
            download_count: 0,
            created_at: Utc::now(),
        };
        let candidate_id = candidate.app_id.clone();
        let app = self.repo.find_or_create_app(candidate).await?;
        let app_created = app.app_id == candidate_id;

        let package_id = PackageId::generate();
        let result = self
            .commit(&request, &names, &package_id, &app, info, checksum)
            .await;

        match result {
            Ok(release) => {
                info!(
                    package_id = %release.package_id,
                    app_id = %release.app_id,
                    app_name = %release.info.app_name,
                    version = %release.info.version,
                    source = release.source_store.as_deref().unwrap_or("upload"),
                    "Release registered"
                );
                Ok(release)
            }
            Err(e) => {
                self.discard(&package_id, &app.app_id, app_created).await;
                Err(e)
            }
        }
    }

    /// Undo a registration: stored files, the release record and, when
    /// `drop_empty_app` is set, the app if no release of it remains.
    ///
    /// Cleanup failures are logged so the error that triggered the rollback
    /// is the one callers see.
    pub async fn discard(&self, package_id: &PackageId, app_id: &AppId, drop_empty_app: bool) {
        if let Err(e) = self.files.delete_package(package_id).await {
            warn!(package_id = %package_id, error = %e, "Failed to remove stored files");
        }
        if let Err(e) = self.repo.delete_release(package_id).await {
            warn!(package_id = %package_id, error = %e, "Failed to remove release record");
        }
        if !drop_empty_app {
            return;
        }
        match self.repo.releases_of_app(app_id).await {
            Ok(remaining) if remaining.is_empty() => {
                if let Err(e) = self.repo.delete_app(app_id).await {
                    warn!(app_id = %app_id, error = %e, "Failed to remove empty app");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(app_id = %app_id, error = %e, "Failed to check app for releases"),
        }
    }

    async fn commit(
        &self,
        request: &IngestRequest,
        names: &AdmittedFiles,
        package_id: &PackageId,
        app: &App,
        info: BasicInfo,
        checksum: String,
    ) -> AppResult<Release> {
        let package = self
            .files
            .store_file(package_id, &names.package, &request.package.path)
            .await?;
        let icon = self
            .files
            .store_file(package_id, &names.icon, &request.icon.path)
            .await?;
        let demo = match (&request.demo, &names.demo) {
            (Some(file), Some(name)) => Some(self.files.store_file(package_id, name, &file.path).await?),
            _ => None,
        };

        let release = Release {
            package_id: package_id.clone(),
            app_id: app.app_id.clone(),
            status: ReleaseStatus::Upload,
            files: ReleaseFiles {
                package,
                icon,
                demo,
                package_checksum: checksum,
            },
            info,
            details: request.details.clone(),
            test_task_id: None,
            owner: request.owner.clone(),
            source_store: request.source_store.clone(),
            created_at: Utc::now(),
        };
        self.repo.insert_release(release.clone()).await?;
        Ok(release)
    }
}
