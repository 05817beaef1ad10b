//! # Upload Admission
//!
//! Security-focused checks applied to every file before any of its bytes are
//! interpreted: name grammar, extension allow-lists and size ceilings per
//! [`FileProfile`], plus relative-path checks for file store handles.
//!
//! ```rust
//! use appstore_engine::validation::{admit_file, FileProfile};
//!
//! let profile = FileProfile::icon(20 * 1024 * 1024);
//! assert!(admit_file(&profile, "logo.png", 4096).is_ok());
//! assert!(admit_file(&profile, "logo.gif", 4096).is_err());
//! ```

pub mod error;
pub mod limits;
pub mod names;
pub mod paths;

pub use self::{
    error::{ValidationError, ValidationResult},
    limits::{
        validate_file_size, FileKind, FileProfile, DEFAULT_ICON_MAX_SIZE, DEFAULT_PACKAGE_MAX_SIZE,
        DEFAULT_VIDEO_MAX_SIZE, ICON_EXTENSIONS, MAX_FILENAME_LENGTH, MAX_PATH_DEPTH,
        PACKAGE_EXTENSIONS, VIDEO_EXTENSIONS,
    },
    names::{admit_name, file_extension, normalize_file_name},
    paths::validate_safe_path,
};

/// Admit or reject a candidate file by name and declared size.
///
/// Returns the normalized file name on success.
pub fn admit_file(profile: &FileProfile, name: &str, size: u64) -> ValidationResult<String> {
    let normalized = admit_name(name)?;

    let extension = file_extension(&normalized).ok_or(ValidationError::MissingExtension)?;
    if !profile
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
    {
        return Err(ValidationError::DisallowedExtension {
            extension,
            allowed: profile.allowed_extensions.join(", "),
        });
    }

    validate_file_size(size, Some(profile.max_size))?;

    tracing::debug!(
        file = %normalized,
        size = size,
        kind = profile.kind.as_str(),
        "File admitted"
    );
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_profile_accepts_csar_and_zip() {
        let profile = FileProfile::package(1024);
        assert_eq!(admit_file(&profile, "app.csar", 10).unwrap(), "app.csar");
        assert_eq!(admit_file(&profile, "App.ZIP", 10).unwrap(), "App.ZIP");
        assert!(matches!(
            admit_file(&profile, "app.tar.gz", 10),
            Err(ValidationError::DisallowedExtension { .. })
        ));
    }

    #[test]
    fn oversize_is_rejected_not_truncated() {
        let profile = FileProfile::video(100);
        assert!(admit_file(&profile, "demo.mp4", 100).is_ok());
        assert!(matches!(
            admit_file(&profile, "demo.mp4", 101),
            Err(ValidationError::FileTooLarge { actual: 101, max: 100 })
        ));
    }

    #[test]
    fn name_without_extension_is_rejected() {
        let profile = FileProfile::icon(100);
        assert!(matches!(
            admit_file(&profile, "icon", 1),
            Err(ValidationError::MissingExtension)
        ));
    }
}
