//! Peer-facing HTTP handlers mounted under `/api/v1/federation`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{InboxNotice, PullablePackage, PullableQuery, Release};
use crate::state::AppState;
use crate::storage::FileHandle;
use crate::types::{is_offered, PackageId};

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub requester: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InboxReceipt {
    pub message_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store_id: String,
    pub version: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        store_id: state.config.store.store_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn pullable_packages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PullableQuery>,
) -> AppResult<Json<Vec<PullablePackage>>> {
    let offers = state.federation.local_offers(&query).await?;
    debug!(count = offers.len(), "Serving pullable packages");
    Ok(Json(offers))
}

fn attachment(file_name: &str, content_type: &'static str, data: Bytes) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        file_name.replace(['"', '\\'], "_")
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response()
}

fn content_type_for(file_name: &str) -> &'static str {
    match crate::validation::file_extension(file_name).as_deref() {
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("bmp") => "image/bmp",
        Some("mp4") => "video/mp4",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

async fn serve_file(state: &AppState, handle: &FileHandle) -> AppResult<Response> {
    let data = state.files.retrieve(handle).await?;
    let name = handle.file_name();
    Ok(attachment(name, content_type_for(name), data))
}

async fn published_release(state: &AppState, package_id: &PackageId) -> AppResult<Release> {
    state
        .repo
        .get_release(package_id)
        .await?
        .filter(|release| is_offered(release.status))
        .ok_or_else(|| AppError::NotFound(format!("Release {package_id} not found")))
}

/// Package archive download; counted against the app.
pub async fn download_package(
    State(state): State<Arc<AppState>>,
    Path(package_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> AppResult<Response> {
    let package_id = PackageId::from(package_id);
    let requester = query.requester.as_deref().unwrap_or("anonymous");
    let release = state
        .federation
        .record_download(&package_id, requester)
        .await?;
    serve_file(&state, &release.files.package).await
}

pub async fn download_icon(
    State(state): State<Arc<AppState>>,
    Path(package_id): Path<String>,
) -> AppResult<Response> {
    let release = published_release(&state, &PackageId::from(package_id)).await?;
    serve_file(&state, &release.files.icon).await
}

pub async fn download_demo(
    State(state): State<Arc<AppState>>,
    Path(package_id): Path<String>,
) -> AppResult<Response> {
    let release = published_release(&state, &PackageId::from(package_id)).await?;
    let demo = release.files.demo.as_ref().ok_or_else(|| {
        AppError::NotFound(format!("Release {} has no demo", release.package_id))
    })?;
    serve_file(&state, demo).await
}

pub async fn inbox_message(
    State(state): State<Arc<AppState>>,
    Json(notice): Json<InboxNotice>,
) -> AppResult<(StatusCode, Json<InboxReceipt>)> {
    let message = state.federation.receive_notice(notice).await?;
    Ok((
        StatusCode::CREATED,
        Json(InboxReceipt {
            message_id: message.message_id,
        }),
    ))
}
