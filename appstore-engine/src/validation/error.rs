//! # Input Validation: Error Types

/// Error types for validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Name cannot be empty")]
    Empty,

    #[error("Input too long: {actual} exceeds maximum {max}")]
    TooLong { actual: usize, max: usize },

    #[error("Contains null bytes")]
    NullBytes,

    #[error("Contains control characters")]
    ControlCharacters,

    #[error("Leading or trailing whitespace is not allowed")]
    SurroundingWhitespace,

    #[error("Invalid characters in input: {input}")]
    InvalidCharacters { input: String },

    #[error("Name cannot end with a dot or space")]
    TrailingDotOrSpace,

    #[error("Name '{name}' is reserved on Windows systems")]
    ReservedName { name: String },

    #[error("File name has no extension")]
    MissingExtension,

    #[error("Extension '{extension}' is not allowed (allowed: {allowed})")]
    DisallowedExtension { extension: String, allowed: String },

    #[error("File size exceeds limit: {actual} > {max}")]
    FileTooLarge { actual: u64, max: u64 },

    #[error("Path traversal detected: {path}")]
    PathTraversal { path: String },

    #[error("Absolute path not allowed: {path}")]
    AbsolutePath { path: String },

    #[error("Path depth exceeds maximum: {actual} > {max}")]
    PathTooDeep { actual: usize, max: usize },
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;
