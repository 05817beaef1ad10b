//! # Application State
//!
//! [`AppState`] wires the engine together: repository, file store,
//! ingestion pipeline, release lifecycle and federation engine, all sharing
//! one [`Config`]. It is built once at startup and shared with the HTTP
//! handlers behind an `Arc`.
//!
//! ```rust,no_run
//! use appstore_engine::{AppState, Config};
//!
//! let state = AppState::from_config(Config::default())?;
//! # Ok::<(), appstore_engine::AppError>(())
//! ```

use std::sync::Arc;

use crate::config::Config;
use crate::error::AppResult;
use crate::federation::{FederationEngine, HttpPeerTransport, PeerTransport};
use crate::ingest::{IngestSettings, Ingestor};
use crate::lifecycle::ReleaseLifecycle;
use crate::repository::{InMemoryRepository, Repository};
use crate::storage::{FileStore, LocalFileStore};
use crate::testgate::TestGateAdapter;
use crate::types::Principal;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: Arc<dyn Repository>,
    pub files: Arc<dyn FileStore>,
    pub ingestor: Arc<Ingestor>,
    pub lifecycle: Arc<ReleaseLifecycle>,
    pub federation: Arc<FederationEngine>,
}

impl AppState {
    /// Build the production wiring: local file store under `storage.data_dir`,
    /// HTTP peer transport and the configured test gate.
    pub fn from_config(config: Config) -> AppResult<Self> {
        config.validate()?;
        let transport: Arc<dyn PeerTransport> = Arc::new(HttpPeerTransport::new(&config.federation)?);
        let gate = TestGateAdapter::from_config(&config.test_gate)?;
        let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(&config.storage.data_dir));
        Ok(Self::assemble(
            config,
            Arc::new(InMemoryRepository::new()),
            files,
            gate,
            transport,
        ))
    }

    /// Build from explicit collaborators.
    pub fn assemble(
        config: Config,
        repo: Arc<dyn Repository>,
        files: Arc<dyn FileStore>,
        gate: TestGateAdapter,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        let ingestor = Arc::new(Ingestor::new(
            Arc::clone(&repo),
            Arc::clone(&files),
            IngestSettings::from_config(&config),
        ));
        let lifecycle = Arc::new(ReleaseLifecycle::new(
            Arc::clone(&repo),
            Arc::clone(&files),
            gate,
        ));
        let federation = Arc::new(FederationEngine::new(
            &config,
            transport,
            Arc::clone(&repo),
            Arc::clone(&ingestor),
        ));

        Self {
            config: Arc::new(config),
            repo,
            files,
            ingestor,
            lifecycle,
            federation,
        }
    }

    /// Principal for an authenticated user, with the administrative
    /// capability when the id is listed under `security.admin_users`.
    pub fn principal(&self, user_id: &str, user_name: &str) -> Principal {
        if self.config.is_admin(user_id) {
            Principal::admin(user_id, user_name)
        } else {
            Principal::user(user_id, user_name)
        }
    }
}
