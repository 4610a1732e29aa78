//! Device-local secret storage
//!
//! Entries are addressed by `(namespace, account)`. They survive restarts
//! but are never synced between devices. Backends:
//! - [`MemoryLocalStore`]: process memory only
//! - [`FileLocalStore`]: one `0600` file per entry under a private directory
//! - `KeyringLocalStore` (feature `os-keyring`): platform keychain
//!   (Keychain, Credential Manager, Secret Service)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{AccountId, StoreError, StoreResult};

/// Per-account secret key-value store
///
/// `set` replaces any existing entry as a whole, `get` reports a missing
/// entry as `Ok(None)`, and `delete` succeeds when there is nothing to delete.
#[async_trait]
pub trait SecureLocalStore: Send + Sync {
    /// Store `value`, replacing any existing entry
    async fn set(&self, value: &str, namespace: &str, account: &AccountId) -> StoreResult<()>;

    /// Fetch an entry
    async fn get(&self, namespace: &str, account: &AccountId) -> StoreResult<Option<String>>;

    /// Remove an entry
    async fn delete(&self, namespace: &str, account: &AccountId) -> StoreResult<()>;
}

/// In-memory secret store
#[derive(Default)]
pub struct MemoryLocalStore {
    entries: RwLock<HashMap<(String, AccountId), String>>,
}

impl MemoryLocalStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SecureLocalStore for MemoryLocalStore {
    async fn set(&self, value: &str, namespace: &str, account: &AccountId) -> StoreResult<()> {
        let key = (namespace.to_string(), account.clone());
        let mut entries = self.entries.write().await;
        entries.remove(&key);
        entries.insert(key, value.to_string());
        Ok(())
    }

    async fn get(&self, namespace: &str, account: &AccountId) -> StoreResult<Option<String>> {
        let key = (namespace.to_string(), account.clone());
        Ok(self.entries.read().await.get(&key).cloned())
    }

    async fn delete(&self, namespace: &str, account: &AccountId) -> StoreResult<()> {
        let key = (namespace.to_string(), account.clone());
        self.entries.write().await.remove(&key);
        Ok(())
    }
}

/// File-backed secret store
///
/// Each entry is a single file at `<namespace>/<account>.secret`, written
/// through a temp file and renamed into place so readers never see a
/// partially written value. Namespaces are directories, so a dot in either
/// name cannot make two entries share a file.
pub struct FileLocalStore {
    /// Base path for storage
    base_path: PathBuf,
}

impl FileLocalStore {
    /// Create a store rooted at `base_path`, creating the directory if needed
    pub fn new(base_path: PathBuf) -> StoreResult<Self> {
        std::fs::create_dir_all(&base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&base_path, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(Self { base_path })
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn entry_path(&self, namespace: &str, account: &AccountId) -> StoreResult<PathBuf> {
        let safe = !namespace.is_empty()
            && namespace != "."
            && namespace != ".."
            && namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !safe {
            return Err(StoreError::Unavailable(format!(
                "invalid namespace: {:?}",
                namespace
            )));
        }
        Ok(self
            .base_path
            .join(namespace)
            .join(format!("{}.secret", account)))
    }

    async fn ensure_namespace_dir(&self, path: &Path) -> StoreResult<()> {
        let Some(dir) = path.parent() else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SecureLocalStore for FileLocalStore {
    async fn set(&self, value: &str, namespace: &str, account: &AccountId) -> StoreResult<()> {
        let path = self.entry_path(namespace, account)?;
        let temp_path = path.with_extension("secret.tmp");
        self.ensure_namespace_dir(&path).await?;

        tokio::fs::write(&temp_path, value.as_bytes()).await?;

        // Set restrictive permissions before the entry becomes visible
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&temp_path, &path).await?;
        debug!("Stored local secret {} for {}", namespace, account);
        Ok(())
    }

    async fn get(&self, namespace: &str, account: &AccountId) -> StoreResult<Option<String>> {
        let path = self.entry_path(namespace, account)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, account: &AccountId) -> StoreResult<()> {
        let path = self.entry_path(namespace, account)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Platform keychain secret store
///
/// The namespace is used as the keychain service name and the account id as
/// the user name. Keychain calls block, so they run on the blocking pool.
#[cfg(feature = "os-keyring")]
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringLocalStore;

#[cfg(feature = "os-keyring")]
impl KeyringLocalStore {
    /// Create a keychain-backed store
    pub fn new() -> Self {
        Self
    }

    fn map_keyring_error(err: keyring::Error) -> StoreError {
        match err {
            keyring::Error::NoStorageAccess(e) => {
                StoreError::Unavailable(format!("Keyring access denied: {:?}", e))
            }
            keyring::Error::PlatformFailure(e) => {
                StoreError::Unavailable(format!("Keyring platform failure: {:?}", e))
            }
            other => StoreError::Unavailable(format!("Keyring error: {}", other)),
        }
    }

    async fn run<T, F>(f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StoreResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Keyring task failed: {}", e)))?
    }
}

#[cfg(feature = "os-keyring")]
#[async_trait]
impl SecureLocalStore for KeyringLocalStore {
    async fn set(&self, value: &str, namespace: &str, account: &AccountId) -> StoreResult<()> {
        let (namespace, account, value) =
            (namespace.to_string(), account.to_string(), zeroize::Zeroizing::new(value.to_string()));
        Self::run(move || {
            let entry =
                keyring::Entry::new(&namespace, &account).map_err(Self::map_keyring_error)?;
            // Delete then add so an update never leaves a half-written item
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(Self::map_keyring_error(e)),
            }
            entry.set_password(&value).map_err(Self::map_keyring_error)
        })
        .await
    }

    async fn get(&self, namespace: &str, account: &AccountId) -> StoreResult<Option<String>> {
        let (namespace, account) = (namespace.to_string(), account.to_string());
        Self::run(move || {
            let entry =
                keyring::Entry::new(&namespace, &account).map_err(Self::map_keyring_error)?;
            match entry.get_password() {
                Ok(value) => Ok(Some(value)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(Self::map_keyring_error(e)),
            }
        })
        .await
    }

    async fn delete(&self, namespace: &str, account: &AccountId) -> StoreResult<()> {
        let (namespace, account) = (namespace.to_string(), account.to_string());
        Self::run(move || {
            let entry =
                keyring::Entry::new(&namespace, &account).map_err(Self::map_keyring_error)?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(Self::map_keyring_error(e)),
            }
        })
        .await
    }
}
