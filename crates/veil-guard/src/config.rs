//! Guard configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::PolicyConfig;
use crate::store::{FileLocalStore, FileRemoteStore, RemotePinStore, SecureLocalStore};

/// Backend for the device-local secret cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalBackend {
    /// One private file per entry under `local_store_path`
    #[default]
    File,
    /// Platform keychain (requires the `os-keyring` feature)
    Keyring,
}

/// Guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Lockout and hashing policy
    pub policy: PolicyConfig,

    /// Which local secret store to use
    pub local_backend: LocalBackend,

    /// Directory for the file-backed local cache
    pub local_store_path: PathBuf,

    /// Directory of remote PIN documents
    pub remote_store_path: PathBuf,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            local_backend: LocalBackend::default(),
            local_store_path: Self::data_dir().join("local"),
            remote_store_path: Self::data_dir().join("remote"),
        }
    }
}

impl GuardConfig {
    fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("veil")
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("veil")
            .join("guard.json")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, writing the default file first if none exists
    pub fn load_or_create(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        tracing::info!("Created default config at {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> crate::Result<()> {
        if self.local_backend == LocalBackend::File {
            std::fs::create_dir_all(&self.local_store_path)?;
        }
        std::fs::create_dir_all(&self.remote_store_path)?;
        Ok(())
    }

    /// Open the configured local secret store
    pub fn open_local_store(&self) -> crate::Result<Arc<dyn SecureLocalStore>> {
        match self.local_backend {
            LocalBackend::File => Ok(Arc::new(FileLocalStore::new(
                self.local_store_path.clone(),
            )?)),
            #[cfg(feature = "os-keyring")]
            LocalBackend::Keyring => Ok(Arc::new(crate::store::KeyringLocalStore::new())),
            #[cfg(not(feature = "os-keyring"))]
            LocalBackend::Keyring => Err(crate::GuardError::Config(
                "keyring backend requires the os-keyring feature".into(),
            )),
        }
    }

    /// Open the configured remote store
    pub fn open_remote_store(&self) -> crate::Result<Arc<dyn RemotePinStore>> {
        Ok(Arc::new(FileRemoteStore::new(self.remote_store_path.clone())?))
    }
}
