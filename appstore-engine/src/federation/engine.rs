//! Push/pull orchestration and the federation message log.

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::{DownloadKind, PeerTransport};
use super::filter::filter_offers;
use super::peers::PeerDirectory;
use crate::archive::scoped_dir;
use crate::config::{Config, PeerStore};
use crate::error::{AppError, AppResult};
use crate::ingest::{IncomingFile, IngestRequest, Ingestor};
use crate::models::{
    InboxNotice, Message, MessageFilter, PullablePackage, PullableQuery, PushablePackage, Release,
    ReleaseDetails,
};
use crate::repository::Repository;
use crate::types::{is_offered, MessageType, PackageId, Principal};
use crate::validation::{admit_file, FileProfile};

/// Per-target push outcome, in the order targets were given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushResult {
    pub store_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PushResult {
    fn ok(store_id: &str) -> Self {
        Self {
            store_id: store_id.to_string(),
            success: true,
            reason: None,
        }
    }

    fn failed(store_id: &str, reason: impl Into<String>) -> Self {
        Self {
            store_id: store_id.to_string(),
            success: false,
            reason: Some(reason.into()),
        }
    }
}

/// Offers from one peer, or why that peer could not be listed.
#[derive(Debug, Clone, Serialize)]
pub struct PeerOffers {
    pub store_id: String,
    pub offers: Vec<PullablePackage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Import one peer offer as a local release.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub store_id: String,
    pub offer: PullablePackage,
    pub requester: Principal,
}

pub struct FederationEngine {
    store_id: String,
    store_name: String,
    public_base_url: String,
    staging_root: PathBuf,
    peers: PeerDirectory,
    transport: Arc<dyn PeerTransport>,
    repo: Arc<dyn Repository>,
    ingestor: Arc<Ingestor>,
}

impl FederationEngine {
    pub fn new(
        config: &Config,
        transport: Arc<dyn PeerTransport>,
        repo: Arc<dyn Repository>,
        ingestor: Arc<Ingestor>,
    ) -> Self {
        Self {
            store_id: config.store.store_id.clone(),
            store_name: config.store.store_name.clone(),
            public_base_url: config.public_base_url(),
            staging_root: config.staging_dir(),
            peers: PeerDirectory::new(config.federation.peers.iter().cloned()),
            transport,
            repo,
            ingestor,
        }
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    /// Published releases of this store as peers see them.
    pub async fn local_offers(&self, query: &PullableQuery) -> AppResult<Vec<PullablePackage>> {
        Ok(self
            .repo
            .list_releases()
            .await?
            .iter()
            .filter(|release| is_offered(release.status))
            .map(|release| PullablePackage::from_release(release, &self.store_id, &self.store_name))
            .filter(|offer| query.matches(offer))
            .collect())
    }

    /// What one peer offers that `requester` does not already have.
    pub async fn peer_offers(
        &self,
        store_id: &str,
        query: &PullableQuery,
        requester: &Principal,
    ) -> AppResult<Vec<PullablePackage>> {
        let peer = self.peers.pull_source(store_id)?;
        let offers = self.transport.fetch_pullable(peer, query).await?;
        let local = self.repo.list_releases().await?;
        Ok(filter_offers(offers, &local, requester))
    }

    /// Offers of every pull-enabled peer; a failing peer is reported, not fatal.
    pub async fn browse_peers(
        &self,
        query: &PullableQuery,
        requester: &Principal,
    ) -> AppResult<Vec<PeerOffers>> {
        let local = self.repo.list_releases().await?;
        let fetches = self.peers.pull_sources().map(|peer| async move {
            let result = self.transport.fetch_pullable(peer, query).await;
            (peer.store_id.clone(), result)
        });

        Ok(join_all(fetches)
            .await
            .into_iter()
            .map(|(store_id, result)| match result {
                Ok(offers) => PeerOffers {
                    store_id,
                    offers: filter_offers(offers, &local, requester),
                    error: None,
                },
                Err(e) => {
                    warn!(peer = %store_id, error = %e, "Peer listing failed");
                    PeerOffers {
                        store_id,
                        offers: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect())
    }

    /// Download an offer's artifacts in parallel and ingest them.
    ///
    /// The release always starts in `Upload`, whatever its status at the
    /// source. Nothing is committed if any download or ingestion step fails.
    pub async fn pull(&self, request: PullRequest) -> AppResult<Release> {
        let peer = self.peers.pull_source(&request.store_id)?;
        let offer = &request.offer;
        let settings = self.ingestor.settings();

        let admit_name = |profile: &FileProfile, name: &str| {
            admit_file(profile, name, 0).map_err(|source| AppError::Validation {
                file: name.to_string(),
                source,
            })
        };
        let package_name = admit_name(&settings.package, &offer.package_file)?;
        let icon_name = admit_name(&settings.icon, &offer.icon_file)?;
        let demo_name = offer
            .demo_file
            .as_deref()
            .map(|name| admit_name(&settings.video, name))
            .transpose()?;

        let scratch = scoped_dir(&self.staging_root, "pull-")?;
        let package_path = scratch.path().join(&package_name);
        let icon_path = scratch.path().join(&icon_name);
        let demo_path = demo_name.as_ref().map(|name| scratch.path().join(name));

        let fetch = |kind, path: PathBuf, max_bytes| {
            let package_id = offer.package_id.clone();
            async move {
                self.transport
                    .download(peer, kind, &package_id, &self.store_id, &path, max_bytes)
                    .await
            }
        };
        let demo_fetch = async {
            match &demo_path {
                Some(path) => fetch(DownloadKind::Demo, path.clone(), settings.video.max_size)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        tokio::try_join!(
            fetch(DownloadKind::Package, package_path.clone(), settings.package.max_size),
            fetch(DownloadKind::Icon, icon_path.clone(), settings.icon.max_size),
            demo_fetch,
        )?;

        let release = self
            .ingestor
            .ingest(IngestRequest {
                package: IncomingFile {
                    file_name: package_name,
                    path: package_path,
                },
                icon: IncomingFile {
                    file_name: icon_name,
                    path: icon_path,
                },
                demo: demo_name.zip(demo_path).map(|(file_name, path)| IncomingFile {
                    file_name,
                    path,
                }),
                details: ReleaseDetails {
                    short_desc: offer.short_desc.clone(),
                    industry: offer.industry.clone(),
                    app_type: offer.app_type.clone(),
                },
                owner: request.requester.as_owner(),
                source_store: Some(peer.store_id.clone()),
            })
            .await?;

        let logged = self
            .repo
            .append_message(Message::new(
                MessageType::Pull,
                peer.store_id.clone(),
                self.store_id.clone(),
                format!(
                    "{} pulled {} {} from {}",
                    request.requester.user_name, release.info.app_name, release.info.version, peer.name
                ),
                release.summary(),
                Some(release.status),
            ))
            .await;
        if let Err(e) = logged {
            warn!(package_id = %release.package_id, error = %e, "Pull not recorded, rolling back");
            self.ingestor
                .discard(&release.package_id, &release.app_id, true)
                .await;
            return Err(e);
        }

        info!(
            peer = %peer.store_id,
            remote_package_id = %offer.package_id,
            package_id = %release.package_id,
            "Package pulled"
        );
        Ok(release)
    }

    fn notice_for(&self, release: &Release) -> InboxNotice {
        let url = |kind: DownloadKind| {
            format!("{}/{}/{}", self.public_base_url, kind.route(), release.package_id)
        };
        InboxNotice {
            source_store_id: self.store_id.clone(),
            source_store_name: self.store_name.clone(),
            package_id: release.package_id.clone(),
            name: release.info.app_name.clone(),
            provider: release.info.provider.clone(),
            version: release.info.version.clone(),
            deploy_mode: release.info.deploy_mode,
            checksum: release.files.package_checksum.clone(),
            package_url: url(DownloadKind::Package),
            icon_url: url(DownloadKind::Icon),
            demo_url: release.files.demo.as_ref().map(|_| url(DownloadKind::Demo)),
            description: release.details.short_desc.clone(),
        }
    }

    async fn push_one(&self, release: &Release, notice: &InboxNotice, target: &str) -> PushResult {
        if !is_offered(release.status) {
            return PushResult::failed(
                target,
                format!("release is {} and not published", release.status),
            );
        }
        let Some(peer) = self.peers.get(target) else {
            return PushResult::failed(target, "unknown peer store");
        };
        if !peer.push_enabled {
            return PushResult::failed(target, "pushing to this store is disabled");
        }

        let delivered = self.transport.send_notice(peer, notice).await;
        let success = delivered.is_ok();
        if let Err(e) = self
            .repo
            .record_push(&release.package_id, target, success, Utc::now())
            .await
        {
            warn!(package_id = %release.package_id, peer = %target, error = %e, "Push log update failed");
        }

        match delivered {
            Ok(()) => {
                let message = Message::new(
                    MessageType::Push,
                    self.store_id.clone(),
                    peer.store_id.clone(),
                    format!(
                        "{} {} pushed to {}",
                        release.info.app_name, release.info.version, peer.name
                    ),
                    release.summary(),
                    Some(release.status),
                );
                if let Err(e) = self.repo.append_message(message).await {
                    warn!(package_id = %release.package_id, error = %e, "Push message not recorded");
                }
                PushResult::ok(target)
            }
            Err(e) => {
                warn!(package_id = %release.package_id, peer = %target, error = %e, "Push failed");
                PushResult::failed(target, e.to_string())
            }
        }
    }

    /// Announce a release to each target. Failing to load the release is an
    /// error; everything after that is reported per target.
    pub async fn push(&self, package_id: &PackageId, targets: &[String]) -> AppResult<Vec<PushResult>> {
        let release = self
            .repo
            .get_release(package_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Release {package_id} not found")))?;
        let notice = self.notice_for(&release);

        let results = join_all(
            targets
                .iter()
                .map(|target| self.push_one(&release, &notice, target)),
        )
        .await;

        info!(
            package_id = %package_id,
            targets = targets.len(),
            delivered = results.iter().filter(|r| r.success).count(),
            "Push finished"
        );
        Ok(results)
    }

    /// Record a peer's inbox notice addressed to this store. A package the
    /// same peer already announced is not logged twice; the earlier message
    /// is returned instead.
    pub async fn receive_notice(&self, notice: InboxNotice) -> AppResult<Message> {
        if notice.source_store_id.trim().is_empty() {
            return Err(AppError::BadRequest("Notice has no source store".to_string()));
        }
        let already_notified = self
            .repo
            .messages(&MessageFilter {
                message_type: Some(MessageType::Notice),
                package_id: Some(notice.package_id.clone()),
            })
            .await?
            .into_iter()
            .find(|message| message.source_store == notice.source_store_id);
        if let Some(message) = already_notified {
            debug!(
                peer = %notice.source_store_id,
                package_id = %notice.package_id,
                "Repeated inbox notice ignored"
            );
            return Ok(message);
        }

        let message = Message::new(
            MessageType::Notice,
            notice.source_store_id.clone(),
            self.store_id.clone(),
            if notice.description.is_empty() {
                format!(
                    "{} offers {} {}",
                    notice.source_store_name, notice.name, notice.version
                )
            } else {
                notice.description.clone()
            },
            notice.summary(),
            None,
        );
        self.repo.append_message(message.clone()).await?;
        info!(
            peer = %notice.source_store_id,
            package_id = %notice.package_id,
            "Inbox notice received"
        );
        Ok(message)
    }

    /// Account for a peer downloading a published release.
    pub async fn record_download(&self, package_id: &PackageId, requester: &str) -> AppResult<Release> {
        let release = self
            .repo
            .get_release(package_id)
            .await?
            .filter(|release| is_offered(release.status))
            .ok_or_else(|| AppError::NotFound(format!("Release {package_id} not found")))?;

        let count = self.repo.increment_downloads(&release.app_id).await?;
        self.repo
            .append_message(Message::new(
                MessageType::BeDownloaded,
                self.store_id.clone(),
                requester,
                format!(
                    "{} {} downloaded by {requester}",
                    release.info.app_name, release.info.version
                ),
                release.summary(),
                Some(release.status),
            ))
            .await?;
        info!(package_id = %package_id, requester = %requester, downloads = count, "Package downloaded");
        Ok(release)
    }

    /// Published releases with their push history.
    pub async fn pushable_packages(&self) -> AppResult<Vec<PushablePackage>> {
        let mut pushable = Vec::new();
        for release in self.repo.list_releases().await? {
            if !is_offered(release.status) {
                continue;
            }
            let log = self.repo.push_log(&release.package_id).await?;
            pushable.push(PushablePackage::new(&release, log.as_ref()));
        }
        Ok(pushable)
    }

    pub async fn messages(&self, filter: &MessageFilter) -> AppResult<Vec<Message>> {
        self.repo.messages(filter).await
    }

    pub fn peer(&self, store_id: &str) -> Option<&PeerStore> {
        self.peers.get(store_id)
    }
}
