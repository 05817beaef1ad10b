//! # App Store Engine
//!
//! Package lifecycle and federation engine for an application store.
//!
//! ## Features
//!
//! - **Ingestion**: Admits uploaded package archives, extracts them inside
//!   bounded scratch directories and reads the manifest and documentation
//! - **Lifecycle**: Drives each release through upload, testing and
//!   publication under a per-package lock
//! - **Federation**: Offers published packages to peer stores, pulls peer
//!   offers into the local catalogue and pushes tested releases outward
//!
//! ## Key Modules
//!
//! - [`config`]: Configuration loading and derived limits
//! - [`error`]: Error handling and standardized responses
//! - [`archive`]: Staging and bounded archive extraction
//! - [`introspect`]: Package tree, manifest and documentation reading
//! - [`ingest`]: Upload-to-release pipeline
//! - [`lifecycle`]: Release state machine and app status recomputation
//! - [`testgate`]: External test-service client
//! - [`federation`]: Peer discovery, pull, push and inbox
//! - [`api`]: Peer-facing HTTP endpoints

pub mod api;
pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod federation;
pub mod ingest;
pub mod introspect;
pub mod lifecycle;
pub mod models;
pub mod repository;
pub mod server;
pub mod state;
pub mod storage;
pub mod testgate;
pub mod types;
pub mod validation;

pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ErrorCode};
pub use federation::{FederationEngine, PeerTransport, PullRequest, PushResult};
pub use ingest::{IngestRequest, Ingestor, UploadRequest, UploadedFile};
pub use lifecycle::{DeleteOutcome, ReleaseLifecycle};
pub use models::{App, BasicInfo, Release, ReleaseDetails};
pub use repository::{InMemoryRepository, Repository};
pub use server::{build_router, run_server};
pub use state::AppState;
pub use storage::{FileHandle, FileStore, LocalFileStore};
pub use testgate::{TestGate, TestGateAdapter};
pub use types::{AppId, AppStatus, PackageId, Principal, ReleaseStatus};
