//! Typed credential cache over a [`SecureLocalStore`]
//!
//! A credential occupies exactly two entries per account. The hash entry is
//! written as `<algorithm>$<hashHex>` so a cached credential is verified under
//! the parameters it was created with. Hash and salt are only meaningful
//! together: a half-present pair reads as a miss and is purged.

use std::sync::Arc;

use tracing::warn;
use veil_core::PinCredential;

use super::{AccountId, SecureLocalStore, StoreResult};

/// Namespace for the cached hash entry
pub const HASH_NAMESPACE: &str = "veil.hidden-pin.hash";
/// Namespace for the cached salt entry
pub const SALT_NAMESPACE: &str = "veil.hidden-pin.salt";

/// Reads and writes [`PinCredential`]s in a local secret store
#[derive(Clone)]
pub struct LocalCredentialCache {
    store: Arc<dyn SecureLocalStore>,
}

impl LocalCredentialCache {
    /// Wrap a local secret store
    pub fn new(store: Arc<dyn SecureLocalStore>) -> Self {
        Self { store }
    }

    /// Load the cached credential for `account`
    ///
    /// Returns `Ok(None)` on a miss, including when the cached pair is
    /// incomplete or unreadable.
    pub async fn load(&self, account: &AccountId) -> StoreResult<Option<PinCredential>> {
        let hash_entry = self.store.get(HASH_NAMESPACE, account).await?;
        let salt_entry = self.store.get(SALT_NAMESPACE, account).await?;

        let (hash_entry, salt_entry) = match (hash_entry, salt_entry) {
            (None, None) => return Ok(None),
            (Some(hash), Some(salt)) => (hash, salt),
            _ => {
                warn!("Partial local PIN cache for {}, purging", account);
                self.purge(account).await;
                return Ok(None);
            }
        };

        let (algorithm, hash_hex) = match hash_entry.rsplit_once('$') {
            Some((algorithm, hash)) => (Some(algorithm), hash),
            None => (None, hash_entry.as_str()),
        };

        match PinCredential::from_parts(Some(hash_hex), Some(&salt_entry), algorithm, None) {
            Ok(credential) => Ok(credential),
            Err(e) => {
                warn!("Unreadable local PIN cache for {} ({}), purging", account, e);
                self.purge(account).await;
                Ok(None)
            }
        }
    }

    /// Cache `credential` for `account`
    ///
    /// If the salt cannot be written after the hash was, the hash entry is
    /// removed again so the pair never ends up half-present.
    pub async fn store(&self, account: &AccountId, credential: &PinCredential) -> StoreResult<()> {
        let hash_entry = format!("{}${}", credential.algorithm, credential.hash_hex);
        self.store.set(&hash_entry, HASH_NAMESPACE, account).await?;

        if let Err(e) = self.store.set(&credential.salt_hex, SALT_NAMESPACE, account).await {
            self.purge(account).await;
            return Err(e);
        }

        Ok(())
    }

    /// Remove both entries for `account`
    pub async fn clear(&self, account: &AccountId) -> StoreResult<()> {
        let hash_result = self.store.delete(HASH_NAMESPACE, account).await;
        let salt_result = self.store.delete(SALT_NAMESPACE, account).await;
        hash_result.and(salt_result)
    }

    /// Best-effort removal used on error paths
    async fn purge(&self, account: &AccountId) {
        if let Err(e) = self.clear(account).await {
            warn!("Failed to purge local PIN cache for {}: {}", account, e);
        }
    }
}
