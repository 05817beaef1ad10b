//! # Release Lifecycle
//!
//! Drives releases through the status machine:
//!
//! ```text
//! Upload -> Test_created -> Test_running / Test_waiting
//!        -> Test_success | Test_failed | Test_create_failed
//! Test_success -> Published -> (unpublish) Test_success
//! ```
//!
//! Every mutating operation holds the per-package lock for its whole
//! read-modify-write, so transitions on one package never interleave.
//! Pending releases are refreshed from the test gate before any decision
//! is taken on their status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{App, Release, ReleaseDetails};
use crate::repository::Repository;
use crate::storage::FileStore;
use crate::testgate::{TestGateAdapter, TestSubmission};
use crate::types::{
    can_publish, is_test_allowed, needs_refresh, AppId, PackageId, Principal, ReleaseStatus,
};

/// One async mutex per package id.
#[derive(Debug, Default)]
pub struct PackageLocks {
    locks: Mutex<HashMap<PackageId, Arc<AsyncMutex<()>>>>,
}

impl PackageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, package_id: &PackageId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(package_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock slot of a package that no longer exists.
    pub fn forget(&self, package_id: &PackageId) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(package_id);
    }
}

/// What a deletion removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub package_id: PackageId,
    pub app_id: AppId,
    /// The app went with its last release.
    pub app_removed: bool,
}

pub struct ReleaseLifecycle {
    repo: Arc<dyn Repository>,
    files: Arc<dyn FileStore>,
    gate: TestGateAdapter,
    locks: PackageLocks,
}

impl ReleaseLifecycle {
    pub fn new(repo: Arc<dyn Repository>, files: Arc<dyn FileStore>, gate: TestGateAdapter) -> Self {
        Self {
            repo,
            files,
            gate,
            locks: PackageLocks::new(),
        }
    }

    async fn load(&self, package_id: &PackageId) -> AppResult<Release> {
        self.repo
            .get_release(package_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Release {package_id} not found")))
    }

    fn authorize(principal: &Principal, release: &Release) -> AppResult<()> {
        if principal.is_admin || principal.owns(&release.owner) {
            return Ok(());
        }
        warn!(
            package_id = %release.package_id,
            user_id = %principal.user_id,
            "Permission denied"
        );
        Err(AppError::PermissionDenied {
            package_id: release.package_id.to_string(),
            user_id: principal.user_id.clone(),
        })
    }

    /// Refresh from the gate and persist when the verdict moved. Caller holds the lock.
    async fn refresh_locked(&self, release: &mut Release) -> AppResult<()> {
        if needs_refresh(release.status) && self.gate.refresh(release).await {
            self.repo.update_release(release.clone()).await?;
        }
        Ok(())
    }

    /// Load a release, refreshing it first if its status is pending.
    pub async fn get_release(&self, package_id: &PackageId) -> AppResult<Release> {
        let release = self.load(package_id).await?;
        if !needs_refresh(release.status) {
            return Ok(release);
        }
        let _guard = self.locks.acquire(package_id).await;
        let mut release = self.load(package_id).await?;
        self.refresh_locked(&mut release).await?;
        Ok(release)
    }

    /// Releases of an app, oldest first, pending ones refreshed.
    pub async fn releases_of_app(&self, app_id: &AppId) -> AppResult<Vec<Release>> {
        let mut releases = Vec::new();
        for release in self.repo.releases_of_app(app_id).await? {
            releases.push(self.get_release(&release.package_id).await?);
        }
        Ok(releases)
    }

    /// Send a release to the conformance gate.
    pub async fn submit_for_test(
        &self,
        package_id: &PackageId,
        principal: &Principal,
    ) -> AppResult<Release> {
        let _guard = self.locks.acquire(package_id).await;
        let mut release = self.load(package_id).await?;
        Self::authorize(principal, &release)?;
        self.refresh_locked(&mut release).await?;

        if !is_test_allowed(release.status) {
            return Err(AppError::InvalidTransition {
                package_id: package_id.to_string(),
                status: release.status,
                action: "enter the test flow",
            });
        }

        let submission = TestSubmission {
            package_id: release.package_id.clone(),
            app_name: release.info.app_name.clone(),
            provider: release.info.provider.clone(),
            version: release.info.version.clone(),
            file_name: release.files.package.file_name().to_string(),
            package: self.files.retrieve(&release.files.package).await?,
        };
        self.gate.submit(&mut release, &submission).await;
        self.repo.update_release(release.clone()).await?;
        self.recompute_app_status(&release.app_id).await?;
        Ok(release)
    }

    /// `Test_success -> Published`; the owning app becomes Published.
    pub async fn publish(&self, package_id: &PackageId, principal: &Principal) -> AppResult<Release> {
        let _guard = self.locks.acquire(package_id).await;
        let mut release = self.load(package_id).await?;
        Self::authorize(principal, &release)?;
        self.refresh_locked(&mut release).await?;

        if !can_publish(release.status) {
            return Err(AppError::InvalidTransition {
                package_id: package_id.to_string(),
                status: release.status,
                action: "publish",
            });
        }

        release.status = ReleaseStatus::Published;
        self.repo.update_release(release.clone()).await?;
        self.recompute_app_status(&release.app_id).await?;
        info!(package_id = %package_id, "Release published");
        Ok(release)
    }

    /// `Published -> Test_success`.
    pub async fn unpublish(
        &self,
        package_id: &PackageId,
        principal: &Principal,
    ) -> AppResult<Release> {
        let _guard = self.locks.acquire(package_id).await;
        let mut release = self.load(package_id).await?;
        Self::authorize(principal, &release)?;

        if release.status != ReleaseStatus::Published {
            return Err(AppError::InvalidTransition {
                package_id: package_id.to_string(),
                status: release.status,
                action: "unpublish",
            });
        }

        release.status = ReleaseStatus::TestSuccess;
        self.repo.update_release(release.clone()).await?;
        self.recompute_app_status(&release.app_id).await?;
        info!(package_id = %package_id, "Release unpublished");
        Ok(release)
    }

    /// Replace the descriptive fields of a release.
    pub async fn update_details(
        &self,
        package_id: &PackageId,
        principal: &Principal,
        details: ReleaseDetails,
    ) -> AppResult<Release> {
        let _guard = self.locks.acquire(package_id).await;
        let mut release = self.load(package_id).await?;
        Self::authorize(principal, &release)?;
        release.details = details;
        self.repo.update_release(release.clone()).await?;
        debug!(package_id = %package_id, "Release details updated");
        Ok(release)
    }

    /// Remove a release with its files and push history. The app goes with
    /// its last release; otherwise its status is re-derived.
    pub async fn delete_release(
        &self,
        package_id: &PackageId,
        principal: &Principal,
    ) -> AppResult<DeleteOutcome> {
        let guard = self.locks.acquire(package_id).await;
        let release = self.load(package_id).await?;
        Self::authorize(principal, &release)?;

        self.files.delete_package(package_id).await?;
        self.repo.delete_push_log(package_id).await?;
        self.repo.delete_release(package_id).await?;

        let app_id = release.app_id.clone();
        let remaining = self.repo.releases_of_app(&app_id).await?;
        let app_removed = remaining.is_empty();
        if app_removed {
            self.repo.delete_app(&app_id).await?;
            info!(package_id = %package_id, app_id = %app_id, "Release deleted with its app");
        } else {
            self.recompute_app_status(&app_id).await?;
            info!(package_id = %package_id, app_id = %app_id, "Release deleted");
        }

        drop(guard);
        self.locks.forget(package_id);
        Ok(DeleteOutcome {
            package_id: package_id.clone(),
            app_id,
            app_removed,
        })
    }

    /// Published iff at least one release is Published. Derived and written
    /// in one repository step.
    pub async fn recompute_app_status(&self, app_id: &AppId) -> AppResult<Option<App>> {
        self.repo.sync_app_status(app_id).await
    }
}
