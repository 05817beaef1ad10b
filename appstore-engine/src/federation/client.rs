//! Outbound calls to peer stores.

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::{FederationConfig, PeerStore};
use crate::error::{AppError, AppResult};
use crate::models::{InboxNotice, PullablePackage, PullableQuery};
use crate::types::PackageId;

/// Which artifact of a package to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    Package,
    Icon,
    Demo,
}

impl DownloadKind {
    pub fn route(&self) -> &'static str {
        match self {
            DownloadKind::Package => "download-package",
            DownloadKind::Icon => "download-icon",
            DownloadKind::Demo => "download-demo",
        }
    }
}

/// Peer-facing HTTP surface as seen from this store.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn fetch_pullable(
        &self,
        peer: &PeerStore,
        query: &PullableQuery,
    ) -> AppResult<Vec<PullablePackage>>;

    /// Download one artifact into `dest`, refusing anything over `max_bytes`.
    /// Returns the number of bytes written.
    async fn download(
        &self,
        peer: &PeerStore,
        kind: DownloadKind,
        package_id: &PackageId,
        requester: &str,
        dest: &Path,
        max_bytes: u64,
    ) -> AppResult<u64>;

    async fn send_notice(&self, peer: &PeerStore, notice: &InboxNotice) -> AppResult<()>;
}

fn unavailable(peer: &PeerStore, reason: impl Into<String>) -> AppError {
    AppError::PeerUnavailable {
        store_id: peer.store_id.clone(),
        reason: reason.into(),
    }
}

/// [`PeerTransport`] over HTTP with verified TLS and bounded timeouts.
pub struct HttpPeerTransport {
    client: Client,
    download_client: Client,
}

impl HttpPeerTransport {
    pub fn new(config: &FederationConfig) -> AppResult<Self> {
        let build = |timeout| {
            Client::builder()
                .timeout(timeout)
                .user_agent(concat!("appstore-engine/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {e}")))
        };
        Ok(Self {
            client: build(config.request_timeout())?,
            download_client: build(config.download_timeout())?,
        })
    }

    fn url(peer: &PeerStore, path: &str) -> String {
        format!("{}/{}", peer.url.trim_end_matches('/'), path)
    }

    fn check(peer: &PeerStore, response: Response) -> AppResult<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            warn!(peer = %peer.store_id, status = %status, url = %response.url(), "Peer refused request");
            Err(unavailable(peer, format!("peer answered {status}")))
        }
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn fetch_pullable(
        &self,
        peer: &PeerStore,
        query: &PullableQuery,
    ) -> AppResult<Vec<PullablePackage>> {
        let url = Self::url(peer, "pullable-packages");
        debug!(peer = %peer.store_id, url = %url, "Fetching pullable packages");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| unavailable(peer, e.to_string()))?;
        let offers: Vec<PullablePackage> = Self::check(peer, response)?
            .json()
            .await
            .map_err(|e| unavailable(peer, format!("unreadable offer list: {e}")))?;

        info!(peer = %peer.store_id, count = offers.len(), "Fetched peer offers");
        Ok(offers)
    }

    async fn download(
        &self,
        peer: &PeerStore,
        kind: DownloadKind,
        package_id: &PackageId,
        requester: &str,
        dest: &Path,
        max_bytes: u64,
    ) -> AppResult<u64> {
        let url = Self::url(peer, &format!("{}/{}", kind.route(), package_id));
        debug!(peer = %peer.store_id, url = %url, "Downloading from peer");

        let response = self
            .download_client
            .get(&url)
            .query(&[("requester", requester)])
            .send()
            .await
            .map_err(|e| unavailable(peer, e.to_string()))?;
        let mut response = Self::check(peer, response)?;

        if response.content_length().is_some_and(|len| len > max_bytes) {
            return Err(unavailable(
                peer,
                format!("{} exceeds {max_bytes} bytes", kind.route()),
            ));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| unavailable(peer, e.to_string()))?
        {
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(unavailable(
                    peer,
                    format!("{} exceeds {max_bytes} bytes", kind.route()),
                ));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(peer = %peer.store_id, package_id = %package_id, bytes = written, "Download complete");
        Ok(written)
    }

    async fn send_notice(&self, peer: &PeerStore, notice: &InboxNotice) -> AppResult<()> {
        let url = Self::url(peer, "inbox-message");
        let response = self
            .client
            .post(&url)
            .json(notice)
            .send()
            .await
            .map_err(|e| unavailable(peer, e.to_string()))?;
        Self::check(peer, response)?;
        info!(peer = %peer.store_id, package_id = %notice.package_id, "Notice delivered");
        Ok(())
    }
}
