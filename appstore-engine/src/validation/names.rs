//! # Input Validation: File Names
//!
//! Names are checked on their raw form for control characters and
//! surrounding whitespace, then normalized and matched against a
//! conservative filesystem-safe grammar.

use crate::validation::error::{ValidationError, ValidationResult};
use crate::validation::limits::MAX_FILENAME_LENGTH;

/// Characters that are unsafe on at least one supported filesystem.
const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

const RESERVED_WINDOWS_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Normalize a file name: trim surrounding whitespace and collapse interior
/// whitespace runs into a single space.
///
/// Normalization is idempotent: `normalize_file_name(normalize_file_name(x)) ==
/// normalize_file_name(x)`.
pub fn normalize_file_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Admit a file name, returning its normalized form.
///
/// # Errors
///
/// Returns an error if the name:
/// - Is empty after normalization
/// - Contains null bytes or other control characters
/// - Starts or ends with whitespace
/// - Contains any of `\ / : * ? " < > |`
/// - Ends with a dot
/// - Is a reserved Windows device name
/// - Is longer than 255 normalized characters
pub fn admit_name(name: &str) -> ValidationResult<String> {
    if name.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(ValidationError::ControlCharacters);
    }

    if name.starts_with(char::is_whitespace) || name.ends_with(char::is_whitespace) {
        return Err(ValidationError::SurroundingWhitespace);
    }

    let normalized = normalize_file_name(name);
    if normalized.is_empty() {
        return Err(ValidationError::Empty);
    }

    let length = normalized.chars().count();
    if length > MAX_FILENAME_LENGTH {
        return Err(ValidationError::TooLong {
            actual: length,
            max: MAX_FILENAME_LENGTH,
        });
    }

    if normalized.contains(FORBIDDEN_CHARS) {
        return Err(ValidationError::InvalidCharacters { input: normalized });
    }

    if normalized.ends_with('.') || normalized.ends_with(' ') {
        return Err(ValidationError::TrailingDotOrSpace);
    }

    let stem = match normalized.find('.') {
        Some(dot) => &normalized[..dot],
        None => normalized.as_str(),
    };
    if RESERVED_WINDOWS_NAMES
        .iter()
        .any(|reserved| stem.eq_ignore_ascii_case(reserved))
    {
        return Err(ValidationError::ReservedName {
            name: stem.to_string(),
        });
    }

    Ok(normalized)
}

/// Lowercased extension after the last dot, if any.
pub fn file_extension(name: &str) -> Option<String> {
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}
