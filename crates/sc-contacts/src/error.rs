//! Error types for sc-contacts

use thiserror::Error;

use crate::models::PermissionGrade;

/// sc-contacts error type
///
/// `Clone` so a single permission request outcome can be shared by every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContactsError {
    #[error("Permission denied: address book access is {0}")]
    PermissionDenied(PermissionGrade),

    #[error("Permission request failed: {0}")]
    PermissionRequestFailed(String),

    #[error("A permission request is already in progress")]
    RequestInProgress,

    #[error("Enumeration error: {0}")]
    Enumeration(String),

    #[error("Batch failed: {0}")]
    BatchFailed(String),

    #[error("Context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ContactsError {
    /// Whether a caller may reasonably try the same call again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Enumeration(_) | Self::BatchFailed(_) | Self::RequestInProgress | Self::Cancelled
        )
    }

    /// Stable short code, as the JS side of a bridge expects
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "permission_denied",
            Self::PermissionRequestFailed(_) => "permission_error",
            Self::RequestInProgress => "request_in_progress",
            Self::Enumeration(_) => "fetch_failed",
            Self::BatchFailed(_) => "batch_failed",
            Self::ContextUnavailable(_) => "context_unavailable",
            Self::Cancelled => "cancelled",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<sc_core::Error> for ContactsError {
    fn from(e: sc_core::Error) -> Self {
        Self::Configuration(e.to_string())
    }
}

/// Why a single raw record could not be normalized
///
/// Recovered inside the batch worker; the record is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("record has no identifier")]
    MissingIdentifier,

    #[error("record {id}: invalid birthday {month}/{day}")]
    InvalidBirthday { id: String, month: u32, day: u32 },

    #[error("record {id}: {reason}")]
    Malformed { id: String, reason: String },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ContactsError>;
