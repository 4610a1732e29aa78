//! Error types for the Veil guard

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for guard operations
pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors surfaced by PIN policy operations
///
/// Failed current-PIN checks in change and remove all surface as
/// [`GuardError::VerificationFailed`], whether the PIN was wrong, missing or
/// locked out.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] veil_core::Error),

    /// Malformed PIN, rejected before any I/O
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No signed-in account
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Local or remote store failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Verify attempted during an active lockout window
    #[error("Locked out for {0} seconds")]
    Locked(u64),

    /// Partial or malformed credential record
    #[error("Corrupted credential: {0}")]
    Corrupted(String),

    /// Current PIN did not verify
    #[error("PIN verification failed")]
    VerificationFailed,

    /// No PIN exists for this account
    #[error("PIN not set")]
    NotSet,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background key derivation task did not complete
    #[error("Background task failed: {0}")]
    Task(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GuardError {
    fn from(e: serde_json::Error) -> Self {
        GuardError::Serialization(e.to_string())
    }
}

impl From<StoreError> for GuardError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotAuthenticated => GuardError::NotAuthenticated,
            other => GuardError::StoreUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let err: GuardError = StoreError::NotAuthenticated.into();
        assert!(matches!(err, GuardError::NotAuthenticated));

        let err: GuardError = StoreError::Unavailable("offline".into()).into();
        assert!(matches!(err, GuardError::StoreUnavailable(ref msg) if msg.contains("offline")));
    }

    #[test]
    fn test_invalid_pin_maps_to_core() {
        let err: GuardError = veil_core::validate_pin("12").unwrap_err().into();
        assert_eq!(err.to_string(), "Core error: PIN must be 4-8 digits");
    }
}
