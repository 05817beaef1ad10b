//! # Input Validation: Relative Paths
//!
//! File store handles are relative paths under the store root; they are
//! checked here before ever being joined onto it.

use crate::validation::error::{ValidationError, ValidationResult};
use crate::validation::limits::MAX_PATH_DEPTH;
use std::path::{Component, Path, PathBuf};

/// Validate that a path is relative, shallow, and free of traversal.
pub fn validate_safe_path<P: AsRef<Path>>(path: P) -> ValidationResult<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();

    if path_str.is_empty() {
        return Err(ValidationError::Empty);
    }

    if path_str.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    if path_str.chars().any(|c| c.is_control()) {
        return Err(ValidationError::ControlCharacters);
    }

    if path.is_absolute() || path_str.starts_with('/') || path_str.starts_with('\\') {
        return Err(ValidationError::AbsolutePath {
            path: path_str.to_string(),
        });
    }

    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
        || path_str
            .split(['/', '\\'])
            .any(|segment| segment == ".." || segment == ".")
    {
        return Err(ValidationError::PathTraversal {
            path: path_str.to_string(),
        });
    }

    let depth = path.components().count();
    if depth > MAX_PATH_DEPTH {
        return Err(ValidationError::PathTooDeep {
            actual: depth,
            max: MAX_PATH_DEPTH,
        });
    }

    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_safe_path() {
        assert!(validate_safe_path("packages/abc123/app.csar").is_ok());
        assert!(validate_safe_path("packages/abc123/icon.png").is_ok());

        assert!(validate_safe_path("../../../etc/passwd").is_err());
        assert!(validate_safe_path("/etc/passwd").is_err());
        assert!(validate_safe_path("packages/../secrets").is_err());
        assert!(validate_safe_path("packages/./x").is_err());
        assert!(validate_safe_path("path/with/null\0byte").is_err());
        assert!(validate_safe_path("a/b/c/d/e/f/g/h/i/j/k").is_err());
    }
}
