//! Veil Guard - hidden-content PIN protection
//!
//! This crate provides:
//! - Device-local secret storage (file, memory, OS keychain)
//! - The authoritative remote PIN record and its stores
//! - Lockout policy and the PIN policy manager
//! - Configuration and the `veil` CLI

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod store;

pub use auth::{
    BiometricPrompt, LockoutPolicy, LockoutState, PinPolicyManager, PinStatus, PolicyConfig,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GuardConfig, LocalBackend};
pub use error::{GuardError, Result};
pub use store::{
    AccountId, FileLocalStore, FileRemoteStore, LocalCredentialCache, MemoryLocalStore,
    MemoryRemoteStore, PinDocument, RemotePinStore, SecureLocalStore, StoreError,
};
