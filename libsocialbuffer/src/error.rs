//! Error types for SocialBuffer

use std::fmt;

use thiserror::Error;

use crate::types::PostStatus;

pub type Result<T> = std::result::Result<T, BufferError>;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: PostStatus, to: PostStatus },

    #[error("Invalid post type: {0}")]
    InvalidType(String),

    #[error("Invalid post priority: {0}")]
    InvalidPriority(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl BufferError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BufferError::Validation(_)
            | BufferError::InvalidType(_)
            | BufferError::InvalidPriority(_)
            | BufferError::UnsupportedPlatform(_) => 3,
            BufferError::Platform(PlatformError::Authentication(_)) => 2,
            _ => 1,
        }
    }

    /// Whether the failure may succeed if the same operation is attempted later.
    pub fn is_transient(&self) -> bool {
        match self {
            BufferError::Platform(platform_error) => platform_error.is_transient(),
            _ => false,
        }
    }

    /// Shorthand for a single-field validation failure.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        BufferError::Validation(errors)
    }
}

impl From<ValidationErrors> for BufferError {
    fn from(errors: ValidationErrors) -> Self {
        BufferError::Validation(errors)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for DbError {
    fn from(error: serde_json::Error) -> Self {
        DbError::Corrupt(error.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl PlatformError {
    /// Network trouble, rate limits and timeouts are worth retrying.
    /// Authentication and policy failures will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Network(_) | PlatformError::RateLimit(_) | PlatformError::Timeout(_) => {
                true
            }
            PlatformError::Authentication(_)
            | PlatformError::Validation(_)
            | PlatformError::Posting(_) => false,
        }
    }

    pub fn kind(&self) -> FailureKind {
        if self.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }
}

/// Retry classification of a failed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(FailureKind::Transient),
            "permanent" => Some(FailureKind::Permanent),
            _ => None,
        }
    }
}

/// A single violated field.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

/// Every violation found while checking a command or aggregate.
///
/// Validation never stops at the first problem so callers can fix
/// everything in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationErrors {
    violations: Vec<Violation>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.violations.extend(other.violations);
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    /// Distinct field names, in the order they were first reported.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for violation in &self.violations {
            if !fields.contains(&violation.field.as_str()) {
                fields.push(&violation.field);
            }
        }
        fields
    }

    /// `Ok(())` when nothing was reported, otherwise the whole list as an error.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(BufferError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .violations
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_validation() {
        let error = BufferError::invalid_field("content", "Content cannot be empty");
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = BufferError::Platform(PlatformError::Authentication("expired token".into()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_errors() {
        let error = BufferError::Platform(PlatformError::Network("reset".into()));
        assert_eq!(error.exit_code(), 1);

        let error = BufferError::Config(ConfigError::MissingField("database.path".into()));
        assert_eq!(error.exit_code(), 1);

        let error = BufferError::NotFound("post abc".into());
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_transient_classification() {
        assert!(PlatformError::Network("x".into()).is_transient());
        assert!(PlatformError::RateLimit("x".into()).is_transient());
        assert!(PlatformError::Timeout("x".into()).is_transient());
        assert!(!PlatformError::Authentication("x".into()).is_transient());
        assert!(!PlatformError::Validation("x".into()).is_transient());
        assert!(!PlatformError::Posting("x".into()).is_transient());

        assert!(BufferError::from(PlatformError::RateLimit("x".into())).is_transient());
        assert!(!BufferError::UnsupportedPlatform("myspace".into()).is_transient());
    }

    #[test]
    fn test_failure_kind_roundtrip_through_db_strings() {
        for kind in [FailureKind::Transient, FailureKind::Permanent] {
            assert_eq!(FailureKind::from_db(kind.as_str()), Some(kind));
        }
        assert_eq!(FailureKind::from_db("sometimes"), None);
    }

    #[test]
    fn test_validation_errors_collects_all_fields() {
        let mut errors = ValidationErrors::new();
        errors.add("content", "too long");
        errors.add("media_urls", "too many");
        errors.add("content", "blank");

        assert_eq!(errors.len(), 3);
        assert_eq!(errors.fields(), vec!["content", "media_urls"]);
        assert!(errors.has_field("media_urls"));
        assert!(!errors.has_field("hashtags"));

        let message = BufferError::Validation(errors).to_string();
        assert!(message.contains("content: too long"));
        assert!(message.contains("media_urls: too many"));
    }

    #[test]
    fn test_empty_validation_errors_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_error_message_formatting_platform() {
        let error = BufferError::Platform(PlatformError::RateLimit("Too many requests".into()));
        assert_eq!(
            error.to_string(),
            "Platform error: Rate limit exceeded: Too many requests"
        );
    }

    #[test]
    fn test_invalid_transition_message() {
        let error = BufferError::InvalidStateTransition {
            from: PostStatus::Published,
            to: PostStatus::Published,
        };
        assert_eq!(
            error.to_string(),
            "Invalid state transition: published -> published"
        );
    }
}
