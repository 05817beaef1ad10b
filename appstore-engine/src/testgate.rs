//! Conformance-test gate.
//!
//! A release must pass an external test run before it can be published.
//! [`TestGate`] is the wire boundary; [`TestGateAdapter`] applies the gate's
//! verdicts to releases. Transport failures are never fatal here: a gate
//! that cannot be reached leaves the release status untouched.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::TestGateConfig;
use crate::error::{AppError, AppResult};
use crate::models::Release;
use crate::types::{needs_refresh, status_from_verdict, PackageId, ReleaseStatus};

/// Header carrying the gate's access token.
const TOKEN_HEADER: &str = "access_token";

/// What is sent to the gate when a release enters the test flow.
#[derive(Debug, Clone)]
pub struct TestSubmission {
    pub package_id: PackageId,
    pub app_name: String,
    pub provider: String,
    pub version: String,
    pub file_name: String,
    pub package: Bytes,
}

#[async_trait]
pub trait TestGate: Send + Sync {
    /// Create a test task, returning its id.
    async fn create_task(&self, submission: &TestSubmission) -> AppResult<String>;

    /// Current verdict string for a task, `None` when the gate has none yet.
    async fn task_status(&self, task_id: &str) -> AppResult<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    #[serde(default, alias = "taskId", alias = "task_id")]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// [`TestGate`] speaking JSON over HTTP with verified TLS.
pub struct HttpTestGate {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTestGate {
    pub fn new(config: &TestGateConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("appstore-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn decode(response: reqwest::Response) -> AppResult<TaskResponse> {
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::TestGateUnavailable {
                reason: format!("gate answered {status}"),
            });
        }
        response
            .json()
            .await
            .map_err(|e| AppError::TestGateUnavailable {
                reason: format!("unreadable gate response: {e}"),
            })
    }
}

fn unreachable_gate(e: reqwest::Error) -> AppError {
    warn!(error = %e, "Test gate request failed");
    AppError::TestGateUnavailable {
        reason: e.to_string(),
    }
}

#[async_trait]
impl TestGate for HttpTestGate {
    async fn create_task(&self, submission: &TestSubmission) -> AppResult<String> {
        let file = multipart::Part::stream(submission.package.clone())
            .file_name(submission.file_name.clone());
        let form = multipart::Form::new()
            .text("packageId", submission.package_id.to_string())
            .text("appName", submission.app_name.clone())
            .text("provider", submission.provider.clone())
            .text("version", submission.version.clone())
            .part("file", file);

        let url = format!("{}/tasks", self.base_url);
        debug!(url = %url, package_id = %submission.package_id, "Submitting test task");
        let response = self
            .authorized(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(unreachable_gate)?;

        Self::decode(response)
            .await?
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::TestGateUnavailable {
                reason: "gate response carried no task id".to_string(),
            })
    }

    async fn task_status(&self, task_id: &str) -> AppResult<Option<String>> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(unreachable_gate)?;
        Ok(Self::decode(response).await?.status)
    }
}

/// Stand-in used when no gate is configured; every submission is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTestGate;

#[async_trait]
impl TestGate for DisabledTestGate {
    async fn create_task(&self, _submission: &TestSubmission) -> AppResult<String> {
        Err(AppError::TestGateUnavailable {
            reason: "no test gate configured".to_string(),
        })
    }

    async fn task_status(&self, _task_id: &str) -> AppResult<Option<String>> {
        Ok(None)
    }
}

/// Applies gate verdicts to releases. Callers persist the result.
#[derive(Clone)]
pub struct TestGateAdapter {
    gate: Arc<dyn TestGate>,
}

impl TestGateAdapter {
    pub fn new(gate: Arc<dyn TestGate>) -> Self {
        Self { gate }
    }

    pub fn from_config(config: &TestGateConfig) -> AppResult<Self> {
        let gate: Arc<dyn TestGate> = if config.enabled {
            Arc::new(HttpTestGate::new(config)?)
        } else {
            Arc::new(DisabledTestGate)
        };
        Ok(Self::new(gate))
    }

    /// Refresh a pending release from the gate.
    ///
    /// Returns `true` when the status changed. Non-pending releases, missing
    /// task ids, unreachable gates and unrecognised verdicts all leave the
    /// release as it was.
    pub async fn refresh(&self, release: &mut Release) -> bool {
        if !needs_refresh(release.status) {
            return false;
        }
        let Some(task_id) = release.test_task_id.clone() else {
            return false;
        };

        let verdict = match self.gate.task_status(&task_id).await {
            Ok(Some(verdict)) => verdict,
            Ok(None) => return false,
            Err(e) => {
                warn!(package_id = %release.package_id, task_id = %task_id, error = %e, "Test status refresh failed");
                return false;
            }
        };

        match status_from_verdict(&verdict) {
            Some(status) if status != release.status => {
                info!(
                    package_id = %release.package_id,
                    from = %release.status,
                    to = %status,
                    "Test verdict applied"
                );
                release.status = status;
                true
            }
            Some(_) => false,
            None => {
                warn!(package_id = %release.package_id, verdict = %verdict, "Unrecognised test verdict");
                false
            }
        }
    }

    /// Submit a release to the gate, moving it to `Test_created`, or to
    /// `Test_create_failed` if the gate refuses or cannot be reached.
    pub async fn submit(&self, release: &mut Release, submission: &TestSubmission) {
        match self.gate.create_task(submission).await {
            Ok(task_id) => {
                info!(package_id = %release.package_id, task_id = %task_id, "Test task created");
                release.status = ReleaseStatus::TestCreated;
                release.test_task_id = Some(task_id);
            }
            Err(e) => {
                warn!(package_id = %release.package_id, error = %e, "Test task creation failed");
                release.status = ReleaseStatus::TestCreateFailed;
            }
        }
    }
}
