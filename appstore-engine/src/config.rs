//! # Configuration Management
//!
//! The store reads one JSON document describing the network binding, its own
//! identity inside the federation, storage locations, hard limits for
//! untrusted input, the peer directory, the test-gate endpoint and logging.
//!
//! - [`ServerConfig`]: bind address and the public base URL peers download from
//! - [`StoreConfig`]: this store's identity in federation messages
//! - [`StorageConfig`]: data and staging directories
//! - [`LimitsConfig`]: upload ceilings and extraction bounds
//! - [`FederationConfig`]: peer stores and outbound timeouts
//! - [`TestGateConfig`]: conformance-test service endpoint
//! - [`SecurityConfig`]: administrative user ids
//!
//! ```rust,no_run
//! # use appstore_engine::config::Config;
//! let config = Config::load_or_default("config.json")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use appstore_logging::LogSettings;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::archive::ExtractionLimits;
use crate::error::{AppError, AppResult};
use crate::introspect::IntrospectLimits;
use crate::validation::FileProfile;

const MIB: u64 = 1024 * 1024;

/// Store ids appear in URLs and message logs.
static STORE_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("Invalid store id regex")
});

/// Main configuration structure for a store instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    #[serde(default)]
    pub test_gate: TestGateConfig,
    #[serde(default)]
    pub logging: LogSettings,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host/IP address to bind to
    pub host: String,
    /// Port number to listen on
    pub port: u16,
    /// URL scheme ("http" or "https")
    pub scheme: String,
    /// Externally reachable base URL; derived from host/port when absent
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Identity of this store inside the federation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub store_id: String,
    pub store_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for stored package files
    pub data_dir: PathBuf,
    /// Scratch area for uploads and extraction; `<data_dir>/staging` when absent
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

/// Ceilings applied to untrusted input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub package_max_mb: u64,
    pub icon_max_mb: u64,
    pub video_max_mb: u64,
    pub max_entries: usize,
    pub max_unpacked_mb: u64,
    pub max_doc_kb: u64,
    pub max_line_length: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            package_max_mb: 5 * 1024,
            icon_max_mb: 20,
            video_max_mb: 50,
            max_entries: 1024,
            max_unpacked_mb: 10 * 1024,
            max_doc_kb: 1024,
            max_line_length: 4096,
        }
    }
}

/// A peer store this instance exchanges packages with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStore {
    pub store_id: String,
    pub name: String,
    /// Base URL of the peer's federation surface, e.g. `https://peer/api/v1/federation`
    pub url: String,
    #[serde(default = "default_true")]
    pub push_enabled: bool,
    #[serde(default = "default_true")]
    pub pull_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    #[serde(default)]
    pub peers: Vec<PeerStore>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        FederationConfig {
            request_timeout_secs: 30,
            download_timeout_secs: 600,
            peers: Vec::new(),
        }
    }
}

impl FederationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Conformance-test service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestGateConfig {
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TestGateConfig {
    fn default() -> Self {
        TestGateConfig {
            enabled: false,
            url: "http://127.0.0.1:8081/api/v1".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

impl TestGateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// User ids holding the administrative capability
    pub admin_users: Vec<String>,
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not match the expected layout.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Check store ids and URLs that `serde` alone cannot.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |reason: String| Err(AppError::InvalidConfig(reason));

        if !STORE_ID_REGEX.is_match(&self.store.store_id) {
            return invalid(format!("invalid store id '{}'", self.store.store_id));
        }
        if let Some(public_url) = &self.server.public_url {
            http_url(public_url).map_err(|reason| {
                AppError::InvalidConfig(format!("server.public_url: {reason}"))
            })?;
        }
        if self.test_gate.enabled {
            http_url(&self.test_gate.url)
                .map_err(|reason| AppError::InvalidConfig(format!("test_gate.url: {reason}")))?;
        }

        let mut seen = HashSet::new();
        for peer in &self.federation.peers {
            if !STORE_ID_REGEX.is_match(&peer.store_id) {
                return invalid(format!("invalid peer store id '{}'", peer.store_id));
            }
            if peer.store_id == self.store.store_id {
                return invalid(format!("peer '{}' has this store's own id", peer.store_id));
            }
            if !seen.insert(peer.store_id.as_str()) {
                return invalid(format!("peer '{}' is listed twice", peer.store_id));
            }
            http_url(&peer.url).map_err(|reason| {
                AppError::InvalidConfig(format!("peer '{}': {reason}", peer.store_id))
            })?;
        }
        Ok(())
    }

    /// Load configuration from file with fallback to defaults.
    ///
    /// A missing file yields [`Config::default`]; a present but malformed
    /// file is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.storage
            .staging_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("staging"))
    }

    /// Base URL peers use to reach this store's federation surface.
    pub fn public_base_url(&self) -> String {
        let base = match &self.server.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "{}://{}:{}",
                self.server.scheme, self.server.host, self.server.port
            ),
        };
        format!("{base}/api/v1/federation")
    }

    pub fn package_profile(&self) -> FileProfile {
        FileProfile::package(self.limits.package_max_mb.saturating_mul(MIB))
    }

    pub fn icon_profile(&self) -> FileProfile {
        FileProfile::icon(self.limits.icon_max_mb.saturating_mul(MIB))
    }

    pub fn video_profile(&self) -> FileProfile {
        FileProfile::video(self.limits.video_max_mb.saturating_mul(MIB))
    }

    pub fn extraction_limits(&self) -> ExtractionLimits {
        ExtractionLimits {
            max_entries: self.limits.max_entries,
            max_total_bytes: self.limits.max_unpacked_mb.saturating_mul(MIB),
        }
    }

    pub fn introspect_limits(&self) -> IntrospectLimits {
        IntrospectLimits {
            max_entries: self.limits.max_entries,
            max_doc_bytes: self.limits.max_doc_kb.saturating_mul(1024),
            max_line_length: self.limits.max_line_length,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.security.admin_users.iter().any(|id| id == user_id)
    }

    pub fn peer(&self, store_id: &str) -> Option<&PeerStore> {
        self.federation
            .peers
            .iter()
            .find(|peer| peer.store_id == store_id)
    }
}

fn http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("'{raw}' is not a URL: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported scheme '{other}' in '{raw}'")),
    }
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str(include_str!("../config.json"))
            .expect("Failed to parse embedded config.json")
    }
}
