//! Common test utilities and helpers
//!
//! Package archive builders, a scripted test gate, an in-process peer
//! transport and a fixture wiring them into an [`AppState`].

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use appstore_engine::config::{Config, PeerStore};
use appstore_engine::federation::{DownloadKind, PeerTransport};
use appstore_engine::ingest::{UploadRequest, UploadedFile};
use appstore_engine::models::{
    App, InboxNotice, Message, MessageFilter, PullablePackage, PullableQuery, PushLogEntry,
    ReleaseDetails,
};
use appstore_engine::repository::Repository;
use appstore_engine::testgate::{TestGate, TestGateAdapter, TestSubmission};
use appstore_engine::types::{AppId, PackageId, Principal};
use appstore_engine::{
    AppError, AppResult, AppState, InMemoryRepository, LocalFileStore, Release,
};

/// Minimal PNG signature; icons are never decoded.
pub const ICON_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n0000";

pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn manifest(name: &str, provider: &str, version: &str) -> String {
    format!(
        "app_product_name: {name}\napp_provider_id: {provider}\napp_package_version: {version}\napp_contact: ops@{provider}.example\n"
    )
}

/// A legacy-layout package with a manifest and top-level documentation.
pub fn package_zip(name: &str, provider: &str, version: &str) -> Vec<u8> {
    let manifest = manifest(name, provider, version);
    build_zip(&[
        ("package.mf", manifest.as_bytes()),
        ("README.md", b"# Demo\nA demo application."),
        ("Artifacts/image.bin", b"binary"),
    ])
}

pub fn upload_request(package: Vec<u8>, owner: &Principal) -> UploadRequest {
    UploadRequest {
        package: UploadedFile {
            file_name: "demo.csar".to_string(),
            data: Bytes::from(package),
        },
        icon: UploadedFile {
            file_name: "icon.png".to_string(),
            data: Bytes::from_static(ICON_BYTES),
        },
        demo: None,
        details: ReleaseDetails {
            short_desc: "demo app".to_string(),
            industry: "telecom".to_string(),
            app_type: "video".to_string(),
        },
        owner: owner.as_owner(),
    }
}

pub fn alice() -> Principal {
    Principal::user("u-alice", "alice")
}

pub fn bob() -> Principal {
    Principal::user("u-bob", "bob")
}

/// Test gate whose verdicts are set by the test.
#[derive(Default)]
pub struct ScriptedGate {
    pub refuse: Mutex<bool>,
    pub verdicts: Mutex<HashMap<String, String>>,
    pub submissions: Mutex<Vec<String>>,
}

impl ScriptedGate {
    pub fn set_verdict(&self, task_id: &str, verdict: &str) {
        self.verdicts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), verdict.to_string());
    }

    pub fn refuse_submissions(&self) {
        *self.refuse.lock().unwrap() = true;
    }
}

#[async_trait]
impl TestGate for ScriptedGate {
    async fn create_task(&self, submission: &TestSubmission) -> AppResult<String> {
        if *self.refuse.lock().unwrap() {
            return Err(AppError::TestGateUnavailable {
                reason: "refused".to_string(),
            });
        }
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(submission.package_id.to_string());
        Ok(format!("task-{}", submissions.len()))
    }

    async fn task_status(&self, task_id: &str) -> AppResult<Option<String>> {
        Ok(self.verdicts.lock().unwrap().get(task_id).cloned())
    }
}

/// In-process stand-in for remote stores.
#[derive(Default)]
pub struct FakePeers {
    pub offers: Mutex<HashMap<String, Vec<PullablePackage>>>,
    pub artifacts: Mutex<HashMap<(String, &'static str), Vec<u8>>>,
    pub unreachable: Mutex<HashSet<String>>,
    pub notices: Mutex<Vec<(String, InboxNotice)>>,
}

impl FakePeers {
    pub fn offer(&self, store_id: &str, offer: PullablePackage) {
        self.offers
            .lock()
            .unwrap()
            .entry(store_id.to_string())
            .or_default()
            .push(offer);
    }

    pub fn host(&self, package_id: &PackageId, kind: DownloadKind, data: Vec<u8>) {
        self.artifacts
            .lock()
            .unwrap()
            .insert((package_id.to_string(), kind.route()), data);
    }

    pub fn take_down(&self, store_id: &str) {
        self.unreachable.lock().unwrap().insert(store_id.to_string());
    }

    fn check(&self, peer: &PeerStore) -> AppResult<()> {
        if self.unreachable.lock().unwrap().contains(&peer.store_id) {
            return Err(AppError::PeerUnavailable {
                store_id: peer.store_id.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for FakePeers {
    async fn fetch_pullable(
        &self,
        peer: &PeerStore,
        query: &PullableQuery,
    ) -> AppResult<Vec<PullablePackage>> {
        self.check(peer)?;
        Ok(self
            .offers
            .lock()
            .unwrap()
            .get(&peer.store_id)
            .map(|offers| offers.iter().filter(|o| query.matches(o)).cloned().collect())
            .unwrap_or_default())
    }

    async fn download(
        &self,
        peer: &PeerStore,
        kind: DownloadKind,
        package_id: &PackageId,
        _requester: &str,
        dest: &Path,
        max_bytes: u64,
    ) -> AppResult<u64> {
        self.check(peer)?;
        let data = self
            .artifacts
            .lock()
            .unwrap()
            .get(&(package_id.to_string(), kind.route()))
            .cloned()
            .ok_or_else(|| AppError::PeerUnavailable {
                store_id: peer.store_id.clone(),
                reason: "404 Not Found".to_string(),
            })?;
        if data.len() as u64 > max_bytes {
            return Err(AppError::PeerUnavailable {
                store_id: peer.store_id.clone(),
                reason: format!("{} exceeds {max_bytes} bytes", kind.route()),
            });
        }
        std::fs::write(dest, &data)?;
        Ok(data.len() as u64)
    }

    async fn send_notice(&self, peer: &PeerStore, notice: &InboxNotice) -> AppResult<()> {
        self.check(peer)?;
        self.notices
            .lock()
            .unwrap()
            .push((peer.store_id.clone(), notice.clone()));
        Ok(())
    }
}

/// In-memory repository whose message log can be switched off.
#[derive(Default)]
pub struct FlakyMessageLog {
    inner: InMemoryRepository,
    pub down: AtomicBool,
}

#[async_trait]
impl Repository for FlakyMessageLog {
    async fn find_or_create_app(&self, candidate: App) -> AppResult<App> {
        self.inner.find_or_create_app(candidate).await
    }

    async fn get_app(&self, app_id: &AppId) -> AppResult<Option<App>> {
        self.inner.get_app(app_id).await
    }

    async fn find_app(&self, name: &str, provider: &str) -> AppResult<Option<App>> {
        self.inner.find_app(name, provider).await
    }

    async fn sync_app_status(&self, app_id: &AppId) -> AppResult<Option<App>> {
        self.inner.sync_app_status(app_id).await
    }

    async fn delete_app(&self, app_id: &AppId) -> AppResult<()> {
        self.inner.delete_app(app_id).await
    }

    async fn increment_downloads(&self, app_id: &AppId) -> AppResult<u64> {
        self.inner.increment_downloads(app_id).await
    }

    async fn insert_release(&self, release: Release) -> AppResult<()> {
        self.inner.insert_release(release).await
    }

    async fn get_release(&self, package_id: &PackageId) -> AppResult<Option<Release>> {
        self.inner.get_release(package_id).await
    }

    async fn find_release(
        &self,
        name: &str,
        provider: &str,
        version: &str,
    ) -> AppResult<Option<Release>> {
        self.inner.find_release(name, provider, version).await
    }

    async fn update_release(&self, release: Release) -> AppResult<()> {
        self.inner.update_release(release).await
    }

    async fn delete_release(&self, package_id: &PackageId) -> AppResult<Option<Release>> {
        self.inner.delete_release(package_id).await
    }

    async fn releases_of_app(&self, app_id: &AppId) -> AppResult<Vec<Release>> {
        self.inner.releases_of_app(app_id).await
    }

    async fn list_releases(&self) -> AppResult<Vec<Release>> {
        self.inner.list_releases().await
    }

    async fn append_message(&self, message: Message) -> AppResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AppError::InternalError("message log offline".to_string()));
        }
        self.inner.append_message(message).await
    }

    async fn messages(&self, filter: &MessageFilter) -> AppResult<Vec<Message>> {
        self.inner.messages(filter).await
    }

    async fn record_push(
        &self,
        package_id: &PackageId,
        store_id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> AppResult<PushLogEntry> {
        self.inner.record_push(package_id, store_id, success, at).await
    }

    async fn push_log(&self, package_id: &PackageId) -> AppResult<Option<PushLogEntry>> {
        self.inner.push_log(package_id).await
    }

    async fn delete_push_log(&self, package_id: &PackageId) -> AppResult<()> {
        self.inner.delete_push_log(package_id).await
    }
}

pub fn peer(store_id: &str) -> PeerStore {
    PeerStore {
        store_id: store_id.to_string(),
        name: format!("Store {store_id}"),
        url: format!("http://{store_id}.example/api/v1/federation"),
        push_enabled: true,
        pull_enabled: true,
    }
}

pub struct Fixture {
    pub temp_dir: TempDir,
    pub state: Arc<AppState>,
    pub gate: Arc<ScriptedGate>,
    pub peers: Arc<FakePeers>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        Self::with_repo(Arc::new(InMemoryRepository::new()), adjust)
    }

    pub fn with_repo(repo: Arc<dyn Repository>, adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store.store_id = "store-local".to_string();
        config.store.store_name = "Local".to_string();
        config.storage.data_dir = temp_dir.path().join("data");
        config.storage.staging_dir = Some(temp_dir.path().join("staging"));
        config.federation.peers = vec![peer("store-a"), peer("store-b"), peer("store-c")];
        config.security.admin_users = vec!["u-admin".to_string()];
        adjust(&mut config);

        let gate = Arc::new(ScriptedGate::default());
        let peers = Arc::new(FakePeers::default());
        let state = AppState::assemble(
            config.clone(),
            repo,
            Arc::new(LocalFileStore::new(config.storage.data_dir.clone())),
            TestGateAdapter::new(gate.clone()),
            peers.clone(),
        );

        Self {
            temp_dir,
            state: Arc::new(state),
            gate,
            peers,
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.temp_dir.path().join("staging")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp_dir.path().join("data")
    }

    /// Entries left behind in the staging area.
    pub fn staging_leftovers(&self) -> usize {
        std::fs::read_dir(self.staging_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub async fn upload(&self, name: &str, version: &str, owner: &Principal) -> Release {
        self.state
            .ingestor
            .ingest_upload(upload_request(package_zip(name, "acme", version), owner))
            .await
            .unwrap()
    }

    /// Upload and drive a release to `Test_success`.
    pub async fn tested(&self, name: &str, version: &str, owner: &Principal) -> Release {
        let release = self.upload(name, version, owner).await;
        let submitted = self
            .state
            .lifecycle
            .submit_for_test(&release.package_id, owner)
            .await
            .unwrap();
        let task_id = submitted.test_task_id.clone().unwrap();
        self.gate.set_verdict(&task_id, "success");
        self.state
            .lifecycle
            .get_release(&release.package_id)
            .await
            .unwrap()
    }

    pub async fn published(&self, name: &str, version: &str, owner: &Principal) -> Release {
        let release = self.tested(name, version, owner).await;
        self.state
            .lifecycle
            .publish(&release.package_id, owner)
            .await
            .unwrap()
    }
}
