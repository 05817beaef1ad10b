//! Domain records: apps, releases, federation messages and the projections
//! exchanged with peer stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::storage::FileHandle;
use crate::types::{
    AppId, AppStatus, DeployMode, MessageType, Owner, PackageFormat, PackageId, ReleaseStatus,
};

/// Identity and content facts derived from a package archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub app_name: String,
    pub provider: String,
    pub version: String,
    pub contact: String,
    pub file_type: PackageFormat,
    /// JSON-serialized directory tree of the archive contents.
    pub file_structure: String,
    /// Top-level documentation, possibly truncated.
    pub markdown: String,
    pub deploy_mode: DeployMode,
}

/// Caller-supplied descriptive fields; editable after registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDetails {
    #[serde(default)]
    pub short_desc: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub app_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFiles {
    pub package: FileHandle,
    pub icon: FileHandle,
    pub demo: Option<FileHandle>,
    /// Hex SHA-256 of the stored package archive.
    pub package_checksum: String,
}

/// One versioned package under an [`App`].
///
/// Equality is by `package_id` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub package_id: PackageId,
    pub app_id: AppId,
    pub status: ReleaseStatus,
    pub files: ReleaseFiles,
    pub info: BasicInfo,
    pub details: ReleaseDetails,
    pub test_task_id: Option<String>,
    pub owner: Owner,
    /// Store the release was pulled from, `None` for local uploads.
    pub source_store: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PartialEq for Release {
    fn eq(&self, other: &Self) -> bool {
        self.package_id == other.package_id
    }
}

impl Eq for Release {}

impl Release {
    /// `(name, provider, version)` used for cross-store deduplication.
    pub fn natural_key(&self) -> (&str, &str, &str) {
        (
            &self.info.app_name,
            &self.info.provider,
            &self.info.version,
        )
    }

    pub fn summary(&self) -> PackageSummary {
        PackageSummary {
            package_id: self.package_id.clone(),
            name: self.info.app_name.clone(),
            provider: self.info.provider.clone(),
            version: self.info.version.clone(),
            deploy_mode: self.info.deploy_mode,
        }
    }
}

/// Aggregate root for all releases sharing `(name, provider)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub app_id: AppId,
    pub name: String,
    pub provider: String,
    pub owner: Owner,
    pub status: AppStatus,
    pub download_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub package_id: PackageId,
    pub name: String,
    pub provider: String,
    pub version: String,
    pub deploy_mode: DeployMode,
}

/// Immutable record of one cross-store exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub message_type: MessageType,
    pub source_store: String,
    pub target_store: String,
    pub description: String,
    pub package: PackageSummary,
    pub test_status: Option<ReleaseStatus>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        message_type: MessageType,
        source_store: impl Into<String>,
        target_store: impl Into<String>,
        description: impl Into<String>,
        package: PackageSummary,
        test_status: Option<ReleaseStatus>,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            message_type,
            source_store: source_store.into(),
            target_store: target_store.into(),
            description: description.into(),
            package,
            test_status,
            created_at: Utc::now(),
        }
    }
}

/// Message query; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub package_id: Option<PackageId>,
}

impl MessageFilter {
    pub fn matches(&self, message: &Message) -> bool {
        self.message_type
            .map_or(true, |kind| kind == message.message_type)
            && self
                .package_id
                .as_ref()
                .map_or(true, |id| *id == message.package.package_id)
    }
}

/// Per-target push history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTarget {
    pub attempts: u32,
    pub last_pushed_at: DateTime<Utc>,
    pub last_success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushLogEntry {
    pub package_id: PackageId,
    pub targets: BTreeMap<String, PushTarget>,
}

impl PushLogEntry {
    pub fn new(package_id: PackageId) -> Self {
        Self {
            package_id,
            targets: BTreeMap::new(),
        }
    }

    /// Record one attempt; a repeat push to the same target counts as a retry.
    pub fn record(&mut self, store_id: &str, success: bool, at: DateTime<Utc>) {
        let target = self
            .targets
            .entry(store_id.to_string())
            .or_insert(PushTarget {
                attempts: 0,
                last_pushed_at: at,
                last_success: success,
            });
        target.attempts += 1;
        target.last_pushed_at = at;
        target.last_success = success;
    }

    pub fn last_pushed_at(&self) -> Option<DateTime<Utc>> {
        self.targets.values().map(|t| t.last_pushed_at).max()
    }
}

/// A release as advertised to peers on the pull path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullablePackage {
    pub package_id: PackageId,
    pub name: String,
    pub provider: String,
    pub version: String,
    pub contact: String,
    pub file_type: PackageFormat,
    pub deploy_mode: DeployMode,
    #[serde(default)]
    pub short_desc: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub app_type: String,
    pub package_file: String,
    pub icon_file: String,
    #[serde(default)]
    pub demo_file: Option<String>,
    pub checksum: String,
    pub source_store_id: String,
    pub source_store_name: String,
    pub created_at: DateTime<Utc>,
}

impl PullablePackage {
    pub fn from_release(release: &Release, store_id: &str, store_name: &str) -> Self {
        Self {
            package_id: release.package_id.clone(),
            name: release.info.app_name.clone(),
            provider: release.info.provider.clone(),
            version: release.info.version.clone(),
            contact: release.info.contact.clone(),
            file_type: release.info.file_type,
            deploy_mode: release.info.deploy_mode,
            short_desc: release.details.short_desc.clone(),
            industry: release.details.industry.clone(),
            app_type: release.details.app_type.clone(),
            package_file: release.files.package.file_name().to_string(),
            icon_file: release.files.icon.file_name().to_string(),
            demo_file: release
                .files
                .demo
                .as_ref()
                .map(|demo| demo.file_name().to_string()),
            checksum: release.files.package_checksum.clone(),
            source_store_id: store_id.to_string(),
            source_store_name: store_name.to_string(),
            created_at: release.created_at,
        }
    }

    pub fn natural_key(&self) -> (&str, &str, &str) {
        (&self.name, &self.provider, &self.version)
    }
}

/// Filters accepted by `GET pullable-packages`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullableQuery {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub app_type: Option<String>,
}

impl PullableQuery {
    /// Case-insensitive substring match on every set filter.
    pub fn matches(&self, package: &PullablePackage) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle.as_ref().map_or(true, |needle| {
                haystack
                    .to_lowercase()
                    .contains(&needle.trim().to_lowercase())
            })
        }

        contains(&package.name, &self.name)
            && contains(&package.provider, &self.provider)
            && contains(&package.app_type, &self.app_type)
    }
}

/// Push-side projection: a published release and where it has been sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushablePackage {
    pub package_id: PackageId,
    pub name: String,
    pub provider: String,
    pub version: String,
    pub status: ReleaseStatus,
    pub created_at: DateTime<Utc>,
    pub targets: BTreeMap<String, PushTarget>,
    pub latest_push_time: Option<DateTime<Utc>>,
}

impl PushablePackage {
    pub fn new(release: &Release, log: Option<&PushLogEntry>) -> Self {
        Self {
            package_id: release.package_id.clone(),
            name: release.info.app_name.clone(),
            provider: release.info.provider.clone(),
            version: release.info.version.clone(),
            status: release.status,
            created_at: release.created_at,
            targets: log.map(|entry| entry.targets.clone()).unwrap_or_default(),
            latest_push_time: log.and_then(PushLogEntry::last_pushed_at),
        }
    }
}

/// Body of `POST inbox-message`: a peer announcing a package to this store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxNotice {
    pub source_store_id: String,
    pub source_store_name: String,
    pub package_id: PackageId,
    pub name: String,
    pub provider: String,
    pub version: String,
    pub deploy_mode: DeployMode,
    pub checksum: String,
    pub package_url: String,
    pub icon_url: String,
    #[serde(default)]
    pub demo_url: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl InboxNotice {
    pub fn summary(&self) -> PackageSummary {
        PackageSummary {
            package_id: self.package_id.clone(),
            name: self.name.clone(),
            provider: self.provider.clone(),
            version: self.version.clone(),
            deploy_mode: self.deploy_mode,
        }
    }
}
