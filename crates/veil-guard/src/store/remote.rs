//! Authoritative per-account PIN record
//!
//! The remote record is one JSON document per account. Only the `hiddenPin*`
//! fields belong to this crate; anything else in the document is carried
//! through untouched so profile data sharing the document survives updates.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use veil_core::PinCredential;

use super::{AccountId, StoreError, StoreResult};
use crate::auth::LockoutState;

/// Remote security record for one account
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinDocument {
    /// Hex-encoded derived key
    #[serde(rename = "hiddenPinHash", default, skip_serializing_if = "Option::is_none")]
    pub hash_hex: Option<String>,

    /// Hex-encoded salt
    #[serde(rename = "hiddenPinSalt", default, skip_serializing_if = "Option::is_none")]
    pub salt_hex: Option<String>,

    /// Derivation scheme identifier
    #[serde(rename = "hiddenPinAlgo", default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    /// When the PIN was set
    #[serde(rename = "hiddenPinSetAt", default, skip_serializing_if = "Option::is_none")]
    pub set_at: Option<DateTime<Utc>>,

    /// Consecutive failed verifications
    #[serde(rename = "hiddenPinFailCount", default, skip_serializing_if = "Option::is_none")]
    pub fail_count: Option<u32>,

    /// End of the active lockout window
    #[serde(rename = "hiddenPinLockedUntil", default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,

    /// Fields owned by other parts of the app
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PinDocument {
    /// The credential carried by this document
    ///
    /// `Ok(None)` means no PIN is set. A half-present or malformed record is
    /// a [`veil_core::Error::Corrupted`].
    pub fn credential(&self) -> veil_core::Result<Option<PinCredential>> {
        PinCredential::from_parts(
            self.hash_hex.as_deref(),
            self.salt_hex.as_deref(),
            self.algorithm.as_deref(),
            self.set_at,
        )
    }

    /// The lockout counters carried by this document
    pub fn lockout(&self) -> LockoutState {
        LockoutState {
            fail_count: self.fail_count.unwrap_or(0),
            locked_until: self.locked_until,
        }
    }

    /// Replace the credential and reset lockout counters
    pub fn apply_credential(&mut self, credential: &PinCredential) {
        self.hash_hex = Some(credential.hash_hex.clone());
        self.salt_hex = Some(credential.salt_hex.clone());
        self.algorithm = Some(credential.algorithm.to_string());
        self.set_at = credential.set_at;
        self.apply_lockout(&LockoutState::default());
    }

    /// Replace the lockout counters
    pub fn apply_lockout(&mut self, state: &LockoutState) {
        self.fail_count = Some(state.fail_count);
        self.locked_until = state.locked_until;
    }

    /// Drop every PIN field, keeping unrelated ones
    pub fn clear_pin(&mut self) {
        self.hash_hex = None;
        self.salt_hex = None;
        self.algorithm = None;
        self.set_at = None;
        self.fail_count = None;
        self.locked_until = None;
    }
}

impl fmt::Debug for PinDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinDocument")
            .field("has_hash", &self.hash_hex.is_some())
            .field("has_salt", &self.salt_hex.is_some())
            .field("algorithm", &self.algorithm)
            .field("set_at", &self.set_at)
            .field("fail_count", &self.fail_count)
            .field("locked_until", &self.locked_until)
            .field("extra_fields", &self.extra.len())
            .finish()
    }
}

/// Authoritative PIN store shared by all of an account's devices
#[async_trait]
pub trait RemotePinStore: Send + Sync {
    /// Fetch the account's document, `None` if it does not exist
    async fn fetch(&self, account: &AccountId) -> StoreResult<Option<PinDocument>>;

    /// Write a new credential and reset lockout counters
    async fn save_credential(
        &self,
        account: &AccountId,
        credential: &PinCredential,
    ) -> StoreResult<()>;

    /// Write lockout counters
    async fn save_lockout(&self, account: &AccountId, state: &LockoutState) -> StoreResult<()>;

    /// Remove credential and lockout fields
    async fn clear(&self, account: &AccountId) -> StoreResult<()>;
}

/// In-process remote store
///
/// Can simulate an outage or a signed-out session, and counts every call that
/// reaches it.
pub struct MemoryRemoteStore {
    documents: RwLock<HashMap<AccountId, PinDocument>>,
    online: AtomicBool,
    signed_in: AtomicBool,
    calls: AtomicUsize,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    /// Create an empty, reachable, signed-in store
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            signed_in: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Toggle simulated reachability
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Toggle the simulated auth session
    pub fn set_signed_in(&self, signed_in: bool) {
        self.signed_in.store(signed_in, Ordering::SeqCst);
    }

    /// Number of trait calls received, including rejected ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inspect a document without counting a call
    pub async fn document(&self, account: &AccountId) -> Option<PinDocument> {
        self.documents.read().await.get(account).cloned()
    }

    /// Replace a document without counting a call
    pub async fn put_document(&self, account: &AccountId, document: PinDocument) {
        self.documents.write().await.insert(account.clone(), document);
    }

    fn begin(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("remote store offline".into()));
        }
        if !self.signed_in.load(Ordering::SeqCst) {
            return Err(StoreError::NotAuthenticated);
        }
        Ok(())
    }
}

#[async_trait]
impl RemotePinStore for MemoryRemoteStore {
    async fn fetch(&self, account: &AccountId) -> StoreResult<Option<PinDocument>> {
        self.begin()?;
        Ok(self.documents.read().await.get(account).cloned())
    }

    async fn save_credential(
        &self,
        account: &AccountId,
        credential: &PinCredential,
    ) -> StoreResult<()> {
        self.begin()?;
        let mut documents = self.documents.write().await;
        documents.entry(account.clone()).or_default().apply_credential(credential);
        Ok(())
    }

    async fn save_lockout(&self, account: &AccountId, state: &LockoutState) -> StoreResult<()> {
        self.begin()?;
        let mut documents = self.documents.write().await;
        documents.entry(account.clone()).or_default().apply_lockout(state);
        Ok(())
    }

    async fn clear(&self, account: &AccountId) -> StoreResult<()> {
        self.begin()?;
        if let Some(document) = self.documents.write().await.get_mut(account) {
            document.clear_pin();
        }
        Ok(())
    }
}

/// Directory of JSON documents, one per account
///
/// Stands in for the hosted document database when running the CLI locally.
pub struct FileRemoteStore {
    /// Base path for storage
    base_path: PathBuf,
}

impl FileRemoteStore {
    /// Create a store rooted at `base_path`, creating the directory if needed
    pub fn new(base_path: PathBuf) -> StoreResult<Self> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn document_path(&self, account: &AccountId) -> PathBuf {
        self.base_path.join(format!("{}.json", account))
    }

    async fn load(&self, account: &AccountId) -> StoreResult<Option<PinDocument>> {
        match tokio::fs::read(self.document_path(account)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, account: &AccountId, document: &PinDocument) -> StoreResult<()> {
        let path = self.document_path(account);
        let temp_path = path.with_extension("json.tmp");
        let contents = serde_json::to_vec_pretty(document)?;

        // Write atomically
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        debug!("Saved remote PIN document for {}", account);
        Ok(())
    }

    async fn update<F>(&self, account: &AccountId, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut PinDocument) + Send,
    {
        let mut document = self.load(account).await?.unwrap_or_default();
        f(&mut document);
        self.save(account, &document).await
    }
}

#[async_trait]
impl RemotePinStore for FileRemoteStore {
    async fn fetch(&self, account: &AccountId) -> StoreResult<Option<PinDocument>> {
        self.load(account).await
    }

    async fn save_credential(
        &self,
        account: &AccountId,
        credential: &PinCredential,
    ) -> StoreResult<()> {
        self.update(account, |doc| doc.apply_credential(credential)).await
    }

    async fn save_lockout(&self, account: &AccountId, state: &LockoutState) -> StoreResult<()> {
        self.update(account, |doc| doc.apply_lockout(state)).await
    }

    async fn clear(&self, account: &AccountId) -> StoreResult<()> {
        match self.load(account).await? {
            Some(mut document) => {
                document.clear_pin();
                self.save(account, &document).await
            }
            None => Ok(()),
        }
    }
}
