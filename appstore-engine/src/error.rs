//! # Error Handling and Response Types
//!
//! Every failure the engine can produce is an [`AppError`] variant. The
//! variants follow the failure classes of the ingestion and federation
//! pipeline so a caller can always tell *why* an action failed:
//!
//! - **Validation** (400): bad name, disallowed extension, oversize file
//! - **Rejected archive** (400): extraction bound violated (hostile input)
//! - **Invalid package** (422): manifest missing, unreadable or incomplete
//! - **Invalid state** (409): transition not allowed from the current status
//! - **Forbidden** (403): caller is neither owner nor administrator
//! - **Not found** (404) and **Conflict** (409)
//! - **Upstream** (502): a peer store or the test gate could not be reached
//! - **Internal** (500): I/O and other server-side failures
//!
//! Errors serialize into the same JSON envelope on every endpoint:
//!
//! ```json
//! {
//!   "error": "Human-readable error message",
//!   "code": "machine_readable_error_code",
//!   "details": {...},
//!   "timestamp": "2024-01-01T12:00:00Z"
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::archive::ExtractionViolation;
use crate::types::ReleaseStatus;
use crate::validation::ValidationError;

/// Standardized error response structure for consistent API error handling
#[derive(Serialize, Debug)]
pub struct ApiErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<Value>,
    pub timestamp: String,
}

/// Error code classification for machine-readable error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    RejectedArchive,
    InvalidPackage,
    InvalidState,
    Forbidden,
    NotFound,
    Conflict,
    UploadError,
    UpstreamError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::RejectedArchive => "rejected_archive",
            ErrorCode::InvalidPackage => "invalid_package",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::UploadError => "upload_error",
            ErrorCode::UpstreamError => "upstream_error",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError | ErrorCode::RejectedArchive => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidPackage => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::InvalidState | ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::UploadError => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application-specific error types with error codes
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rejected file '{file}': {source}")]
    Validation {
        file: String,
        #[source]
        source: ValidationError,
    },

    #[error("Rejected archive {archive}: {violation}")]
    ExtractionRejected {
        archive: String,
        violation: ExtractionViolation,
    },

    #[error("Invalid package: {reason}")]
    InvalidPackage { reason: String },

    #[error("Manifest is missing required fields: {}", fields.join(", "))]
    MissingManifestFields { fields: Vec<String> },

    #[error("Release {package_id} cannot {action} while in status {status}")]
    InvalidTransition {
        package_id: String,
        status: ReleaseStatus,
        action: &'static str,
    },

    #[error("User {user_id} may not modify release {package_id}")]
    PermissionDenied { package_id: String, user_id: String },

    #[error("Peer store {store_id} unavailable: {reason}")]
    PeerUnavailable { store_id: String, reason: String },

    #[error("Test gate unavailable: {reason}")]
    TestGateUnavailable { reason: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Get the appropriate error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::Validation { source, .. } => match source {
                ValidationError::FileTooLarge { .. } => ErrorCode::UploadError,
                _ => ErrorCode::ValidationError,
            },
            AppError::BadRequest(_) | AppError::Json(_) => ErrorCode::ValidationError,
            AppError::ExtractionRejected { .. } => ErrorCode::RejectedArchive,
            AppError::InvalidPackage { .. } | AppError::MissingManifestFields { .. } => {
                ErrorCode::InvalidPackage
            }
            AppError::InvalidTransition { .. } => ErrorCode::InvalidState,
            AppError::PermissionDenied { .. } => ErrorCode::Forbidden,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::PeerUnavailable { .. } | AppError::TestGateUnavailable { .. } => {
                ErrorCode::UpstreamError
            }
            AppError::InternalError(_) | AppError::InvalidConfig(_) | AppError::Io(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Get additional error details if available
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::Validation { file, .. } => Some(json!({ "file": file })),
            AppError::ExtractionRejected { violation, .. } => {
                Some(json!({ "violation": violation.to_string() }))
            }
            AppError::MissingManifestFields { fields } => Some(json!({ "fields": fields })),
            AppError::InvalidTransition {
                package_id,
                status,
                action,
            } => Some(json!({
                "package_id": package_id,
                "status": status.as_str(),
                "action": action,
            })),
            AppError::PermissionDenied { package_id, .. } => {
                Some(json!({ "package_id": package_id }))
            }
            AppError::PeerUnavailable { store_id, .. } => Some(json!({ "store_id": store_id })),
            _ => None,
        }
    }

    /// Create a standardized error response
    pub fn to_error_response(&self) -> ApiErrorResponse {
        let code = self.error_code();
        ApiErrorResponse {
            error: self.to_string(),
            code: code.as_str().to_string(),
            details: self.details(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_response = self.to_error_response();
        let status = self.error_code().http_status();

        if status.is_server_error() {
            tracing::error!(error = %self, code = %error_response.code, "Request failed");
        } else {
            tracing::warn!(error = %self, code = %error_response.code, "Request rejected");
        }

        (status, axum::Json(error_response)).into_response()
    }
}

/// Convenient result type for application operations.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classes_are_distinguishable() {
        let transition = AppError::InvalidTransition {
            package_id: "p1".into(),
            status: ReleaseStatus::TestFailed,
            action: "publish",
        };
        let permission = AppError::PermissionDenied {
            package_id: "p1".into(),
            user_id: "u2".into(),
        };
        let missing = AppError::NotFound("Release p1 not found".into());

        assert_eq!(transition.error_code(), ErrorCode::InvalidState);
        assert_eq!(permission.error_code(), ErrorCode::Forbidden);
        assert_eq!(missing.error_code(), ErrorCode::NotFound);
        assert_ne!(
            permission.error_code().http_status(),
            missing.error_code().http_status()
        );
    }

    #[test]
    fn peer_failures_are_upstream_errors() {
        let err = AppError::PeerUnavailable {
            store_id: "store-a".into(),
            reason: "download-package exceeds 10 bytes".into(),
        };
        assert_eq!(err.error_code(), ErrorCode::UpstreamError);
        assert_eq!(err.details(), Some(json!({ "store_id": "store-a" })));
    }

    #[test]
    fn oversize_upload_maps_to_payload_too_large() {
        let err = AppError::Validation {
            file: "big.csar".into(),
            source: ValidationError::FileTooLarge { actual: 2, max: 1 },
        };
        assert_eq!(err.error_code().http_status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.details(), Some(json!({ "file": "big.csar" })));
    }

    #[test]
    fn transition_error_carries_context() {
        let err = AppError::InvalidTransition {
            package_id: "abc".into(),
            status: ReleaseStatus::Upload,
            action: "publish",
        };
        assert_eq!(
            err.to_string(),
            "Release abc cannot publish while in status Upload"
        );
        let response = err.to_error_response();
        assert_eq!(response.code, "invalid_state");
        assert_eq!(response.details.unwrap()["status"], "Upload");
    }
}
