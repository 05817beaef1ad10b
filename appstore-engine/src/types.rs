//! Strong type definitions for store identifiers and status tags
//!
//! Identifiers are opaque newtypes so a package id can never be passed where
//! an app id is expected. Status enums carry no behavior of their own; the
//! lifecycle rules live in the free functions at the bottom of this module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique identity of a release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

/// Identity of an app aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

macro_rules! opaque_id {
    ($ty:ident) => {
        impl $ty {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(PackageId);
opaque_id!(AppId);

/// Lifecycle status of a single release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleaseStatus {
    Upload,
    #[serde(rename = "Test_created")]
    TestCreated,
    #[serde(rename = "Test_create_failed")]
    TestCreateFailed,
    #[serde(rename = "Test_running")]
    TestRunning,
    #[serde(rename = "Test_waiting")]
    TestWaiting,
    #[serde(rename = "Test_failed")]
    TestFailed,
    #[serde(rename = "Test_success")]
    TestSuccess,
    Published,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Upload => "Upload",
            ReleaseStatus::TestCreated => "Test_created",
            ReleaseStatus::TestCreateFailed => "Test_create_failed",
            ReleaseStatus::TestRunning => "Test_running",
            ReleaseStatus::TestWaiting => "Test_waiting",
            ReleaseStatus::TestFailed => "Test_failed",
            ReleaseStatus::TestSuccess => "Test_success",
            ReleaseStatus::Published => "Published",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate status of an app, derived from its releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppStatus {
    Published,
    Unpublished,
}

/// Package descriptor generation detected during introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PackageFormat {
    /// Declarative TOSCA descriptors (`TOSCA-Metadata/TOSCA.meta`, `Definitions/*.yaml`).
    Tosca,
    /// Older layout without declarative descriptors.
    Legacy,
}

/// Deployment class declared by the package manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    #[default]
    Container,
    Vm,
}

impl DeployMode {
    /// Parse the manifest `app_class` value; anything unrecognised is a container package.
    pub fn from_manifest_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("vm") {
            DeployMode::Vm
        } else {
            DeployMode::Container
        }
    }
}

/// Kind of a federation log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Notice,
    Pull,
    Push,
    BeDownloaded,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Notice => "notice",
            MessageType::Pull => "pull",
            MessageType::Push => "push",
            MessageType::BeDownloaded => "be_downloaded",
        }
    }
}

/// Registering owner of an app or release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: String,
    pub user_name: String,
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub user_name: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn user(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::user(user_id, user_name)
        }
    }

    pub fn owns(&self, owner: &Owner) -> bool {
        self.user_id == owner.user_id
    }

    pub fn as_owner(&self) -> Owner {
        Owner {
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
        }
    }
}

/// Whether a release in `status` may be submitted (again) to the test gate.
pub fn is_test_allowed(status: ReleaseStatus) -> bool {
    matches!(
        status,
        ReleaseStatus::Upload
            | ReleaseStatus::TestFailed
            | ReleaseStatus::TestCreateFailed
            | ReleaseStatus::TestSuccess
    )
}

/// Pending statuses must be refreshed from the test gate before being trusted.
pub fn needs_refresh(status: ReleaseStatus) -> bool {
    matches!(
        status,
        ReleaseStatus::TestCreated | ReleaseStatus::TestRunning | ReleaseStatus::TestWaiting
    )
}

pub fn can_publish(status: ReleaseStatus) -> bool {
    status == ReleaseStatus::TestSuccess
}

/// A release peers may list, download or be notified about.
pub fn is_offered(status: ReleaseStatus) -> bool {
    status == ReleaseStatus::Published
}

/// Map a test-gate verdict string onto the status enumeration.
///
/// Matching ignores case and treats `-`, `_` and spaces alike, so
/// `"create failed"`, `"createFailed"` and `"CREATE_FAILED"` all map to
/// [`ReleaseStatus::TestCreateFailed`].
pub fn status_from_verdict(verdict: &str) -> Option<ReleaseStatus> {
    let normalized: String = verdict
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect();

    match normalized.as_str() {
        "created" => Some(ReleaseStatus::TestCreated),
        "createfailed" => Some(ReleaseStatus::TestCreateFailed),
        "running" => Some(ReleaseStatus::TestRunning),
        "waiting" => Some(ReleaseStatus::TestWaiting),
        "failed" => Some(ReleaseStatus::TestFailed),
        "success" => Some(ReleaseStatus::TestSuccess),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ReleaseStatus; 8] = [
        ReleaseStatus::Upload,
        ReleaseStatus::TestCreated,
        ReleaseStatus::TestCreateFailed,
        ReleaseStatus::TestRunning,
        ReleaseStatus::TestWaiting,
        ReleaseStatus::TestFailed,
        ReleaseStatus::TestSuccess,
        ReleaseStatus::Published,
    ];

    #[test]
    fn test_flow_entry_states() {
        let allowed: Vec<_> = ALL.into_iter().filter(|s| is_test_allowed(*s)).collect();
        assert_eq!(
            allowed,
            vec![
                ReleaseStatus::Upload,
                ReleaseStatus::TestCreateFailed,
                ReleaseStatus::TestFailed,
                ReleaseStatus::TestSuccess,
            ]
        );
    }

    #[test]
    fn pending_states_need_refresh() {
        for status in ALL {
            let pending = matches!(
                status,
                ReleaseStatus::TestCreated | ReleaseStatus::TestRunning | ReleaseStatus::TestWaiting
            );
            assert_eq!(needs_refresh(status), pending, "{status}");
        }
    }

    #[test]
    fn only_test_success_can_publish() {
        for status in ALL {
            assert_eq!(can_publish(status), status == ReleaseStatus::TestSuccess);
        }
    }

    #[test]
    fn verdicts_map_onto_statuses() {
        assert_eq!(status_from_verdict("success"), Some(ReleaseStatus::TestSuccess));
        assert_eq!(status_from_verdict("Running"), Some(ReleaseStatus::TestRunning));
        assert_eq!(
            status_from_verdict("create failed"),
            Some(ReleaseStatus::TestCreateFailed)
        );
        assert_eq!(
            status_from_verdict("createFailed"),
            Some(ReleaseStatus::TestCreateFailed)
        );
        assert_eq!(status_from_verdict(""), None);
        assert_eq!(status_from_verdict("exploded"), None);
    }

    #[test]
    fn status_serializes_with_wire_names() {
        let json = serde_json::to_string(&ReleaseStatus::TestCreateFailed).unwrap();
        assert_eq!(json, "\"Test_create_failed\"");
        let back: ReleaseStatus = serde_json::from_str("\"Test_success\"").unwrap();
        assert_eq!(back, ReleaseStatus::TestSuccess);
    }

    #[test]
    fn admin_and_owner_checks() {
        let owner = Owner {
            user_id: "u1".into(),
            user_name: "alice".into(),
        };
        assert!(Principal::user("u1", "alice").owns(&owner));
        assert!(!Principal::user("u2", "bob").owns(&owner));
        assert!(Principal::admin("root", "admin").is_admin);
    }
}
