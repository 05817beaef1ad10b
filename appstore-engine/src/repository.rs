//! Persistence boundary for apps, releases, federation messages and the
//! push log.
//!
//! Uniqueness is enforced here rather than by callers: package ids are
//! unique, `(name, provider)` identifies at most one app, and an app holds
//! each version at most once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{App, Message, MessageFilter, PushLogEntry, Release};
use crate::types::{is_offered, AppId, AppStatus, PackageId};

#[async_trait]
pub trait Repository: Send + Sync {
    /// Return the app registered for `candidate`'s `(name, provider)`, or
    /// insert `candidate` if there is none.
    async fn find_or_create_app(&self, candidate: App) -> AppResult<App>;

    async fn get_app(&self, app_id: &AppId) -> AppResult<Option<App>>;

    async fn find_app(&self, name: &str, provider: &str) -> AppResult<Option<App>>;

    /// Re-derive the app status from its releases in one step: Published
    /// iff at least one release is Published. `None` if the app is gone.
    async fn sync_app_status(&self, app_id: &AppId) -> AppResult<Option<App>>;

    async fn delete_app(&self, app_id: &AppId) -> AppResult<()>;

    /// Increment the app download counter, returning the new count.
    async fn increment_downloads(&self, app_id: &AppId) -> AppResult<u64>;

    async fn insert_release(&self, release: Release) -> AppResult<()>;

    async fn get_release(&self, package_id: &PackageId) -> AppResult<Option<Release>>;

    async fn find_release(
        &self,
        name: &str,
        provider: &str,
        version: &str,
    ) -> AppResult<Option<Release>>;

    async fn update_release(&self, release: Release) -> AppResult<()>;

    async fn delete_release(&self, package_id: &PackageId) -> AppResult<Option<Release>>;

    /// Releases of one app, oldest first.
    async fn releases_of_app(&self, app_id: &AppId) -> AppResult<Vec<Release>>;

    /// All releases, oldest first.
    async fn list_releases(&self) -> AppResult<Vec<Release>>;

    async fn append_message(&self, message: Message) -> AppResult<()>;

    /// Messages matching `filter`, oldest first.
    async fn messages(&self, filter: &MessageFilter) -> AppResult<Vec<Message>>;

    async fn record_push(
        &self,
        package_id: &PackageId,
        store_id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> AppResult<PushLogEntry>;

    async fn push_log(&self, package_id: &PackageId) -> AppResult<Option<PushLogEntry>>;

    async fn delete_push_log(&self, package_id: &PackageId) -> AppResult<()>;
}

#[derive(Debug, Default)]
struct Tables {
    apps: HashMap<AppId, App>,
    releases: HashMap<PackageId, Release>,
    messages: Vec<Message>,
    push_log: HashMap<PackageId, PushLogEntry>,
}

/// Process-local [`Repository`].
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn oldest_first(mut releases: Vec<Release>) -> Vec<Release> {
    releases.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.package_id.cmp(&b.package_id))
    });
    releases
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_or_create_app(&self, candidate: App) -> AppResult<App> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .apps
            .values()
            .find(|app| app.name == candidate.name && app.provider == candidate.provider)
        {
            return Ok(existing.clone());
        }
        if tables.apps.contains_key(&candidate.app_id) {
            return Err(AppError::Conflict(format!(
                "App id {} already exists",
                candidate.app_id
            )));
        }
        debug!(app_id = %candidate.app_id, name = %candidate.name, "App created");
        tables
            .apps
            .insert(candidate.app_id.clone(), candidate.clone());
        Ok(candidate)
    }

    async fn get_app(&self, app_id: &AppId) -> AppResult<Option<App>> {
        Ok(self.tables.read().await.apps.get(app_id).cloned())
    }

    async fn find_app(&self, name: &str, provider: &str) -> AppResult<Option<App>> {
        Ok(self
            .tables
            .read()
            .await
            .apps
            .values()
            .find(|app| app.name == name && app.provider == provider)
            .cloned())
    }

    async fn sync_app_status(&self, app_id: &AppId) -> AppResult<Option<App>> {
        let mut tables = self.tables.write().await;
        let published = tables
            .releases
            .values()
            .any(|r| r.app_id == *app_id && is_offered(r.status));
        let Some(app) = tables.apps.get_mut(app_id) else {
            return Ok(None);
        };
        let status = if published {
            AppStatus::Published
        } else {
            AppStatus::Unpublished
        };
        if app.status != status {
            debug!(app_id = %app_id, status = ?status, "App status changed");
            app.status = status;
        }
        Ok(Some(app.clone()))
    }

    async fn delete_app(&self, app_id: &AppId) -> AppResult<()> {
        self.tables.write().await.apps.remove(app_id);
        Ok(())
    }

    async fn increment_downloads(&self, app_id: &AppId) -> AppResult<u64> {
        let mut tables = self.tables.write().await;
        let app = tables
            .apps
            .get_mut(app_id)
            .ok_or_else(|| AppError::NotFound(format!("App {app_id} not found")))?;
        app.download_count += 1;
        Ok(app.download_count)
    }

    async fn insert_release(&self, release: Release) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.apps.contains_key(&release.app_id) {
            return Err(AppError::NotFound(format!(
                "App {} not found",
                release.app_id
            )));
        }
        if tables.releases.contains_key(&release.package_id) {
            return Err(AppError::Conflict(format!(
                "Release {} already exists",
                release.package_id
            )));
        }
        if tables
            .releases
            .values()
            .any(|r| r.app_id == release.app_id && r.info.version == release.info.version)
        {
            return Err(AppError::Conflict(format!(
                "Version {} of {} by {} is already registered",
                release.info.version, release.info.app_name, release.info.provider
            )));
        }
        tables
            .releases
            .insert(release.package_id.clone(), release);
        Ok(())
    }

    async fn get_release(&self, package_id: &PackageId) -> AppResult<Option<Release>> {
        Ok(self.tables.read().await.releases.get(package_id).cloned())
    }

    async fn find_release(
        &self,
        name: &str,
        provider: &str,
        version: &str,
    ) -> AppResult<Option<Release>> {
        Ok(self
            .tables
            .read()
            .await
            .releases
            .values()
            .find(|r| r.natural_key() == (name, provider, version))
            .cloned())
    }

    async fn update_release(&self, release: Release) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        match tables.releases.get_mut(&release.package_id) {
            Some(slot) => {
                // file references and app binding are fixed at registration
                if slot.app_id != release.app_id || slot.files != release.files {
                    return Err(AppError::Conflict(format!(
                        "Release {} file references are immutable",
                        release.package_id
                    )));
                }
                *slot = release;
                Ok(())
            }
            None => Err(AppError::NotFound(format!(
                "Release {} not found",
                release.package_id
            ))),
        }
    }

    async fn delete_release(&self, package_id: &PackageId) -> AppResult<Option<Release>> {
        Ok(self.tables.write().await.releases.remove(package_id))
    }

    async fn releases_of_app(&self, app_id: &AppId) -> AppResult<Vec<Release>> {
        let tables = self.tables.read().await;
        Ok(oldest_first(
            tables
                .releases
                .values()
                .filter(|r| r.app_id == *app_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_releases(&self) -> AppResult<Vec<Release>> {
        let tables = self.tables.read().await;
        Ok(oldest_first(tables.releases.values().cloned().collect()))
    }

    async fn append_message(&self, message: Message) -> AppResult<()> {
        self.tables.write().await.messages.push(message);
        Ok(())
    }

    async fn messages(&self, filter: &MessageFilter) -> AppResult<Vec<Message>> {
        Ok(self
            .tables
            .read()
            .await
            .messages
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    async fn record_push(
        &self,
        package_id: &PackageId,
        store_id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> AppResult<PushLogEntry> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .push_log
            .entry(package_id.clone())
            .or_insert_with(|| PushLogEntry::new(package_id.clone()));
        entry.record(store_id, success, at);
        Ok(entry.clone())
    }

    async fn push_log(&self, package_id: &PackageId) -> AppResult<Option<PushLogEntry>> {
        Ok(self.tables.read().await.push_log.get(package_id).cloned())
    }

    async fn delete_push_log(&self, package_id: &PackageId) -> AppResult<()> {
        self.tables.write().await.push_log.remove(package_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BasicInfo, ReleaseDetails, ReleaseFiles};
    use crate::storage::FileHandle;
    use crate::types::{DeployMode, Owner, PackageFormat, ReleaseStatus};

    fn owner() -> Owner {
        Owner {
            user_id: "u1".into(),
            user_name: "alice".into(),
        }
    }

    fn app(name: &str) -> App {
        App {
            app_id: AppId::generate(),
            name: name.into(),
            provider: "acme".into(),
            owner: owner(),
            status: AppStatus::Unpublished,
            download_count: 0,
            created_at: Utc::now(),
        }
    }

    fn release(app_id: &AppId, version: &str) -> Release {
        let package_id = PackageId::generate();
        let handle = |name: &str| {
            serde_json::from_value::<FileHandle>(serde_json::json!(format!(
                "packages/{package_id}/{name}"
            )))
            .unwrap()
        };
        Release {
            files: ReleaseFiles {
                package: handle("demo.csar"),
                icon: handle("icon.png"),
                demo: None,
                package_checksum: "00".into(),
            },
            package_id,
            app_id: app_id.clone(),
            status: ReleaseStatus::Upload,
            info: BasicInfo {
                app_name: "demo".into(),
                provider: "acme".into(),
                version: version.into(),
                contact: "ops@acme".into(),
                file_type: PackageFormat::Legacy,
                file_structure: "[]".into(),
                markdown: String::new(),
                deploy_mode: DeployMode::Container,
            },
            details: ReleaseDetails::default(),
            test_task_id: None,
            owner: owner(),
            source_store: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn app_natural_key_is_unique() {
        let repo = InMemoryRepository::new();
        let first = repo.find_or_create_app(app("demo")).await.unwrap();
        let second = repo.find_or_create_app(app("demo")).await.unwrap();
        assert_eq!(first.app_id, second.app_id);
        assert!(repo.find_app("demo", "acme").await.unwrap().is_some());
        assert!(repo.find_app("demo", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_version_conflicts() {
        let repo = InMemoryRepository::new();
        let app = repo.find_or_create_app(app("demo")).await.unwrap();
        repo.insert_release(release(&app.app_id, "1.0")).await.unwrap();
        repo.insert_release(release(&app.app_id, "2.0")).await.unwrap();
        assert!(matches!(
            repo.insert_release(release(&app.app_id, "1.0")).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(repo.releases_of_app(&app.app_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn file_references_cannot_change() {
        let repo = InMemoryRepository::new();
        let app = repo.find_or_create_app(app("demo")).await.unwrap();
        let original = release(&app.app_id, "1.0");
        repo.insert_release(original.clone()).await.unwrap();

        let mut status_change = original.clone();
        status_change.status = ReleaseStatus::TestSuccess;
        repo.update_release(status_change).await.unwrap();

        let mut tampered = original.clone();
        tampered.files.package_checksum = "ff".into();
        assert!(matches!(
            repo.update_release(tampered).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn app_status_follows_published_releases() {
        let repo = InMemoryRepository::new();
        let app = repo.find_or_create_app(app("demo")).await.unwrap();
        let mut published = release(&app.app_id, "1.0");
        published.status = ReleaseStatus::Published;
        repo.insert_release(published.clone()).await.unwrap();
        repo.increment_downloads(&app.app_id).await.unwrap();

        let synced = repo.sync_app_status(&app.app_id).await.unwrap().unwrap();
        assert_eq!(synced.status, AppStatus::Published);
        assert_eq!(synced.download_count, 1);

        published.status = ReleaseStatus::TestSuccess;
        repo.update_release(published).await.unwrap();
        let synced = repo.sync_app_status(&app.app_id).await.unwrap().unwrap();
        assert_eq!(synced.status, AppStatus::Unpublished);

        assert!(repo.sync_app_status(&AppId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn downloads_and_push_log_accumulate() {
        let repo = InMemoryRepository::new();
        let app = repo.find_or_create_app(app("demo")).await.unwrap();
        repo.increment_downloads(&app.app_id).await.unwrap();
        assert_eq!(repo.increment_downloads(&app.app_id).await.unwrap(), 2);

        let id = PackageId::from("p1");
        repo.record_push(&id, "peer-a", false, Utc::now()).await.unwrap();
        let entry = repo.record_push(&id, "peer-a", true, Utc::now()).await.unwrap();
        assert_eq!(entry.targets["peer-a"].attempts, 2);

        repo.delete_push_log(&id).await.unwrap();
        assert!(repo.push_log(&id).await.unwrap().is_none());
    }
}
