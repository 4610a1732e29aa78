//! Storage for PIN credentials
//!
//! Two tiers, used cache-aside:
//! - [`SecureLocalStore`]: fast, device-scoped secret cache. May be empty or stale.
//! - [`RemotePinStore`]: authoritative per-account document, shared across devices.
//!
//! Reads try local first and fall back to remote, priming the local cache on a
//! remote hit. Writes go to remote first and are then mirrored locally. A failed
//! mirror only degrades the fast path; the next read re-primes it.

pub mod cache;
pub mod local;
pub mod remote;

pub use cache::{LocalCredentialCache, HASH_NAMESPACE, SALT_NAMESPACE};
pub use local::{FileLocalStore, MemoryLocalStore, SecureLocalStore};
pub use remote::{FileRemoteStore, MemoryRemoteStore, PinDocument, RemotePinStore};

#[cfg(feature = "os-keyring")]
pub use local::KeyringLocalStore;

use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors from either storage tier
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The remote session is not signed in
    #[error("Store session not authenticated")]
    NotAuthenticated,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Account identifier that owns a credential
///
/// Used directly in file names, so it must be non-empty and limited to
/// ASCII alphanumerics plus `-`, `_`, `.` and `@`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account identifier, rejecting characters unsafe in paths
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !valid {
            return Err(crate::GuardError::InvalidInput(format!(
                "invalid account id: {:?}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Borrow as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
