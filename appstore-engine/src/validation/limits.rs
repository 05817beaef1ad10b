//! # Input Validation: Size Limits & Profiles
//!
//! Every uploaded file is checked against one [`FileProfile`]. A profile is
//! plain data; there is a single validator for all of them.

use crate::validation::error::{ValidationError, ValidationResult};

/// Extensions accepted for package archives.
pub const PACKAGE_EXTENSIONS: &[&str] = &["csar", "zip"];

/// Extensions accepted for icons.
pub const ICON_EXTENSIONS: &[&str] = &["jpg", "png", "bmp"];

/// Extensions accepted for demo videos.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4"];

/// Default package archive ceiling (5 GiB)
pub const DEFAULT_PACKAGE_MAX_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Default icon ceiling (20 MiB)
pub const DEFAULT_ICON_MAX_SIZE: u64 = 20 * 1024 * 1024;

/// Default demo video ceiling (50 MiB)
pub const DEFAULT_VIDEO_MAX_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum allowed filename length, counted in normalized characters
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Maximum allowed path depth for file store handles
pub const MAX_PATH_DEPTH: usize = 10;

/// What a file is uploaded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Package,
    Icon,
    Video,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Package => "package",
            FileKind::Icon => "icon",
            FileKind::Video => "video",
        }
    }
}

/// Admission profile: size ceiling plus extension allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProfile {
    pub kind: FileKind,
    pub max_size: u64,
    pub allowed_extensions: &'static [&'static str],
}

impl FileProfile {
    pub fn package(max_size: u64) -> Self {
        Self {
            kind: FileKind::Package,
            max_size,
            allowed_extensions: PACKAGE_EXTENSIONS,
        }
    }

    pub fn icon(max_size: u64) -> Self {
        Self {
            kind: FileKind::Icon,
            max_size,
            allowed_extensions: ICON_EXTENSIONS,
        }
    }

    pub fn video(max_size: u64) -> Self {
        Self {
            kind: FileKind::Video,
            max_size,
            allowed_extensions: VIDEO_EXTENSIONS,
        }
    }
}

/// Validate file size against a ceiling (defaults to the package ceiling).
pub fn validate_file_size(size: u64, max_size: Option<u64>) -> ValidationResult<()> {
    let limit = max_size.unwrap_or(DEFAULT_PACKAGE_MAX_SIZE);

    if size > limit {
        return Err(ValidationError::FileTooLarge {
            actual: size,
            max: limit,
        });
    }

    Ok(())
}
