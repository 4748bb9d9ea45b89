//! Error types for the rule store.

use thiserror::Error;

use crate::rules::ValidationIssue;

/// Main error type for rule store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Candidate rule (or reorder request) failed validation
    #[error("Validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// Unknown rule id or version id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage adapter I/O failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Legacy data in an unexpected shape
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Build a validation error carrying a single issue.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Validation(vec![ValidationIssue::new(field, message)])
    }

    /// HTTP status class a REST adapter should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::Validation(_) => 400,
            StoreError::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// Whether the caller is at fault (400/404 class).
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for rule store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(StoreError::invalid("id", "is required").status_code(), 400);
        assert_eq!(StoreError::NotFound("rule x".into()).status_code(), 404);
        assert_eq!(StoreError::Storage("disk full".into()).status_code(), 500);
        assert!(!StoreError::Migration("bad blob".into()).is_client_error());
    }

    #[test]
    fn test_validation_message_lists_issues() {
        let err = StoreError::Validation(vec![
            ValidationIssue::new("id", "is required"),
            ValidationIssue::new("rateLimit.limit", "must be greater than 0"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: id: is required; rateLimit.limit: must be greater than 0"
        );
    }
}
