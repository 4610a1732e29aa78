//! PIN policy manager
//!
//! Orchestrates hashing, the lockout state machine and the two storage tiers
//! for one signed-in account. Every operation runs under a single async mutex,
//! so overlapping calls (a double tap on "unlock") are applied one after the
//! other and every failure is counted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use veil_core::{validate_pin, AlgorithmId, PinCredential};
use zeroize::Zeroizing;

use super::{BiometricPrompt, LockoutPolicy, LockoutState, PinStatus};
use crate::clock::{Clock, SystemClock};
use crate::store::{AccountId, LocalCredentialCache, PinDocument, RemotePinStore, SecureLocalStore};
use crate::{GuardError, Result};

/// Policy knobs for [`PinPolicyManager`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Lockout thresholds
    pub lockout: LockoutPolicy,
    /// Algorithm for newly written credentials
    pub algorithm: AlgorithmId,
    /// Whether a rejected biometric prompt counts as a failed attempt
    pub count_biometric_failures: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            lockout: LockoutPolicy::default(),
            algorithm: AlgorithmId::default(),
            count_biometric_failures: true,
        }
    }
}

/// Where a resolved credential came from during the current call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    /// Process memory or the device cache; may be stale
    Cache,
    /// Just fetched from the remote store
    Remote,
}

#[derive(Default)]
struct SessionState {
    signed_out: bool,
    credential: Option<PinCredential>,
    lockout: LockoutState,
}

/// Set, verify, change and remove the hidden-content PIN of one account
pub struct PinPolicyManager {
    account: AccountId,
    config: PolicyConfig,
    local: LocalCredentialCache,
    remote: Arc<dyn RemotePinStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
}

impl PinPolicyManager {
    /// Create a manager for `account` over the given stores
    pub fn new(
        account: AccountId,
        config: PolicyConfig,
        local: Arc<dyn SecureLocalStore>,
        remote: Arc<dyn RemotePinStore>,
    ) -> Self {
        Self {
            account,
            config,
            local: LocalCredentialCache::new(local),
            remote,
            clock: Arc::new(SystemClock),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The account this manager guards
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Active policy
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Whether a PIN is set
    ///
    /// A device cache hit answers without contacting the remote store.
    pub async fn check_status(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.signed_out {
            return false;
        }
        match self.resolve(&mut state).await {
            Ok(credential) => credential.is_some(),
            Err(e) => {
                debug!("PIN status for {} unresolved: {}", self.account, e);
                false
            }
        }
    }

    /// Current PIN state, including an active lockout
    pub async fn status(&self) -> Result<PinStatus> {
        let mut state = self.session().await?;
        self.sync_lockout(&mut state).await;

        if let Some(until) = state.lockout.locked_until {
            if state.lockout.is_locked_at(self.clock.now()) {
                return Ok(PinStatus::Locked { until });
            }
        }

        match self.resolve(&mut state).await {
            Ok(Some(_)) => Ok(PinStatus::Set),
            Ok(None) | Err(GuardError::Corrupted(_)) => Ok(PinStatus::Unset),
            Err(e) => Err(e),
        }
    }

    /// Set the PIN for the account, replacing any existing one
    ///
    /// Malformed PINs are rejected before any store is touched. The remote
    /// write also clears the lockout counters; the device cache is updated
    /// after it.
    pub async fn set_pin(&self, pin: &str) -> Result<()> {
        check_input(pin)?;
        let mut state = self.session().await?;

        self.write_credential(&mut state, pin, None).await?;
        info!("PIN set for {}", self.account);
        Ok(())
    }

    /// Check a PIN
    ///
    /// Returns false for a wrong PIN, an active lockout, a missing PIN, or an
    /// unreachable store alike. Use
    /// [`remaining_lockout_time`](Self::remaining_lockout_time) to tell a
    /// lockout apart.
    pub async fn verify_pin(&self, pin: &str) -> bool {
        let result = async {
            check_input(pin)?;
            let mut state = self.session().await?;
            self.verify_locked(&mut state, pin).await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("PIN verification for {} rejected: {}", self.account, e);
                false
            }
        }
    }

    /// Replace the PIN after verifying the current one
    pub async fn change_pin(&self, current_pin: &str, new_pin: &str) -> Result<()> {
        check_input(current_pin)?;
        check_input(new_pin)?;
        let mut state = self.session().await?;

        self.verify_locked(&mut state, current_pin)
            .await
            .map_err(conceal)?;
        self.write_credential(&mut state, new_pin, None).await?;

        info!("PIN changed for {}", self.account);
        Ok(())
    }

    /// Remove the PIN from both stores after verifying it
    pub async fn remove_pin(&self, current_pin: &str) -> Result<()> {
        check_input(current_pin)?;
        let mut state = self.session().await?;

        self.verify_locked(&mut state, current_pin)
            .await
            .map_err(conceal)?;

        self.remote.clear(&self.account).await?;
        state.credential = None;
        state.lockout = LockoutState::default();

        if let Err(e) = self.local.clear(&self.account).await {
            warn!("Failed to clear local PIN cache for {}: {}", self.account, e);
        }

        info!("PIN removed for {}", self.account);
        Ok(())
    }

    /// Time left in the current lockout window, zero when not locked
    pub async fn remaining_lockout_time(&self) -> Duration {
        let mut state = self.state.lock().await;
        if state.signed_out {
            return Duration::ZERO;
        }
        self.sync_lockout(&mut state).await;
        state.lockout.remaining_at(self.clock.now())
    }

    /// Failed attempts left before the next lockout
    pub async fn attempts_remaining(&self) -> u32 {
        let mut state = self.state.lock().await;
        if !state.signed_out {
            self.sync_lockout(&mut state).await;
        }
        self.config.lockout.attempts_remaining(state.lockout.fail_count)
    }

    /// Snapshot of the lockout counters
    pub async fn lockout_state(&self) -> LockoutState {
        let mut state = self.state.lock().await;
        if !state.signed_out {
            self.sync_lockout(&mut state).await;
        }
        state.lockout.clone()
    }

    /// Unlock with a biometric prompt instead of the PIN
    ///
    /// Only offered while a PIN is set and no lockout is active. Success does
    /// not reset the failure counters.
    pub async fn verify_with_biometric(&self, prompt: &dyn BiometricPrompt, reason: &str) -> bool {
        let Ok(mut state) = self.session().await else {
            return false;
        };

        if let Err(e) = self.ensure_unlocked(&mut state).await {
            debug!("Biometric prompt for {} refused: {}", self.account, e);
            return false;
        }
        if !matches!(self.resolve(&mut state).await, Ok(Some(_))) {
            return false;
        }

        if prompt.authenticate(reason).await {
            info!("Biometric unlock for {}", self.account);
            return true;
        }

        if self.config.count_biometric_failures {
            self.record_failure(&mut state).await;
        }
        false
    }

    /// End the session; every later operation fails closed
    ///
    /// The device cache is kept.
    pub async fn sign_out(&self) {
        let mut state = self.state.lock().await;
        *state = SessionState {
            signed_out: true,
            ..Default::default()
        };
        info!("Signed out {}", self.account);
    }

    async fn session(&self) -> Result<MutexGuard<'_, SessionState>> {
        let state = self.state.lock().await;
        if state.signed_out {
            return Err(GuardError::NotAuthenticated);
        }
        Ok(state)
    }

    async fn verify_locked(&self, state: &mut SessionState, pin: &str) -> Result<()> {
        self.ensure_unlocked(state).await?;

        let (mut credential, source) = self
            .resolve_with_source(state)
            .await?
            .ok_or(GuardError::NotSet)?;

        if !credential.algorithm.is_supported() {
            warn!(
                "PIN for {} uses unsupported algorithm {}",
                self.account, credential.algorithm
            );
            return Err(GuardError::Corrupted(format!(
                "unsupported algorithm {}",
                credential.algorithm
            )));
        }

        let mut matched = check_pin(&credential, pin).await?;

        if !matched && source == Source::Cache {
            if let Some(fresh) = self.revalidate(state, &credential).await? {
                matched = check_pin(&fresh, pin).await?;
                credential = fresh;
            }
        }

        if !matched {
            self.record_failure(state).await;
            return Err(GuardError::VerificationFailed);
        }

        state.lockout.record_success();
        self.persist_lockout(&state.lockout).await;
        self.upgrade(state, &credential, pin).await;
        Ok(())
    }

    async fn ensure_unlocked(&self, state: &mut SessionState) -> Result<()> {
        let locked = |state: &SessionState| {
            let now = self.clock.now();
            if state.lockout.is_locked_at(now) {
                let secs = state.lockout.remaining_at(now).as_secs().max(1);
                Err(GuardError::Locked(secs))
            } else {
                Ok(())
            }
        };

        locked(&*state)?;
        self.sync_lockout(state).await;
        locked(&*state)
    }

    async fn record_failure(&self, state: &mut SessionState) {
        let now = self.clock.now();
        if state.lockout.record_failure(now, &self.config.lockout) {
            warn!(
                "PIN locked for {} after {} failed attempts",
                self.account, state.lockout.fail_count
            );
        }
        self.persist_lockout(&state.lockout).await;
    }

    async fn persist_lockout(&self, lockout: &LockoutState) {
        if let Err(e) = self.remote.save_lockout(&self.account, lockout).await {
            warn!("Failed to persist lockout counters for {}: {}", self.account, e);
        }
    }

    /// Pick up counters other devices wrote to the remote record
    ///
    /// Skipped while a lockout is already known locally, so a locked verify
    /// touches no store.
    async fn sync_lockout(&self, state: &mut SessionState) {
        if state.lockout.is_locked_at(self.clock.now()) {
            return;
        }
        if let Err(e) = self.fetch_remote(state).await {
            debug!("Remote lockout counters for {} unavailable: {}", self.account, e);
        }
    }

    /// Fetch the remote document and fold its counters into the session
    ///
    /// The merge keeps the stricter counters, so a failure recorded here
    /// never writes back a lower count or a shorter lockout than another
    /// device persisted.
    async fn fetch_remote(&self, state: &mut SessionState) -> Result<Option<PinDocument>> {
        let document = self.remote.fetch(&self.account).await?;
        if let Some(document) = &document {
            state.lockout.merge(&document.lockout());
        }
        Ok(document)
    }

    async fn resolve(&self, state: &mut SessionState) -> Result<Option<PinCredential>> {
        Ok(self
            .resolve_with_source(state)
            .await?
            .map(|(credential, _)| credential))
    }

    /// Resolve the credential: memory, then device cache, then remote
    async fn resolve_with_source(
        &self,
        state: &mut SessionState,
    ) -> Result<Option<(PinCredential, Source)>> {
        if let Some(credential) = &state.credential {
            return Ok(Some((credential.clone(), Source::Cache)));
        }

        match self.local.load(&self.account).await {
            Ok(Some(credential)) => {
                debug!("PIN cache hit for {}", self.account);
                state.credential = Some(credential.clone());
                return Ok(Some((credential, Source::Cache)));
            }
            Ok(None) => debug!("PIN cache miss for {}", self.account),
            Err(e) => warn!("Local PIN cache unavailable for {}: {}", self.account, e),
        }

        let document = match self.fetch_remote(state).await {
            Ok(document) => document,
            Err(GuardError::NotAuthenticated) => return Err(GuardError::NotAuthenticated),
            Err(e) => {
                warn!("Remote PIN store unavailable for {}: {}", self.account, e);
                return Ok(None);
            }
        };

        let credential = match document.as_ref().map(PinDocument::credential) {
            None | Some(Ok(None)) => return Ok(None),
            Some(Ok(Some(credential))) => credential,
            Some(Err(e)) => {
                warn!("Remote PIN record for {} is corrupted: {}", self.account, e);
                return Err(GuardError::Corrupted(e.to_string()));
            }
        };

        self.mirror(&credential).await;
        state.credential = Some(credential.clone());
        Ok(Some((credential, Source::Remote)))
    }

    /// Compare a cached credential against the remote one after a mismatch
    ///
    /// Returns the remote credential if it differs, `None` if the cached one
    /// is current or the remote is unreachable, and [`GuardError::NotSet`] if
    /// the PIN was removed elsewhere.
    async fn revalidate(
        &self,
        state: &mut SessionState,
        cached: &PinCredential,
    ) -> Result<Option<PinCredential>> {
        let document = match self.fetch_remote(state).await {
            Ok(document) => document,
            Err(e) => {
                debug!("Skipping PIN revalidation for {}: {}", self.account, e);
                return Ok(None);
            }
        };

        let remote = match document.as_ref().map(PinDocument::credential) {
            None | Some(Ok(None)) => {
                info!("PIN for {} was removed on another device", self.account);
                state.credential = None;
                if let Err(e) = self.local.clear(&self.account).await {
                    warn!("Failed to clear local PIN cache for {}: {}", self.account, e);
                }
                return Err(GuardError::NotSet);
            }
            Some(Ok(Some(credential))) => credential,
            Some(Err(e)) => {
                warn!("Remote PIN record for {} is corrupted: {}", self.account, e);
                return Ok(None);
            }
        };

        if remote.same_secret(cached) {
            return Ok(None);
        }

        info!("Local PIN cache for {} was stale, refreshed", self.account);
        self.mirror(&remote).await;
        state.credential = Some(remote.clone());
        Ok(Some(remote))
    }

    /// Hash `pin` and write it remote first, then to the device cache
    ///
    /// Session state only changes once the remote write succeeded.
    async fn write_credential(
        &self,
        state: &mut SessionState,
        pin: &str,
        set_at: Option<DateTime<Utc>>,
    ) -> Result<PinCredential> {
        let set_at = set_at.unwrap_or_else(|| self.clock.now());
        let credential = hash_pin(&self.config.algorithm, pin, set_at).await?;

        self.remote.save_credential(&self.account, &credential).await?;

        state.credential = Some(credential.clone());
        state.lockout = LockoutState::default();

        self.mirror(&credential).await;
        Ok(credential)
    }

    async fn mirror(&self, credential: &PinCredential) {
        if let Err(e) = self.local.store(&self.account, credential).await {
            warn!(
                "Local PIN cache write failed for {}, remote copy stays authoritative: {}",
                self.account, e
            );
        }
    }

    /// Re-hash a verified PIN under the configured algorithm
    async fn upgrade(&self, state: &mut SessionState, credential: &PinCredential, pin: &str) {
        if credential.algorithm == self.config.algorithm {
            return;
        }

        match self.write_credential(state, pin, credential.set_at).await {
            Ok(_) => info!(
                "Upgraded PIN for {} from {} to {}",
                self.account, credential.algorithm, self.config.algorithm
            ),
            Err(e) => warn!(
                "PIN upgrade for {} failed, keeping {}: {}",
                self.account, credential.algorithm, e
            ),
        }
    }
}

fn check_input(pin: &str) -> Result<()> {
    validate_pin(pin).map_err(|e| GuardError::InvalidInput(e.to_string()))
}

/// Collapse the reasons a current-PIN check failed into one error
fn conceal(err: GuardError) -> GuardError {
    match err {
        GuardError::Locked(_)
        | GuardError::NotSet
        | GuardError::Corrupted(_)
        | GuardError::VerificationFailed => GuardError::VerificationFailed,
        other => other,
    }
}

async fn hash_pin(
    algorithm: &AlgorithmId,
    pin: &str,
    set_at: DateTime<Utc>,
) -> Result<PinCredential> {
    let algorithm = algorithm.clone();
    let pin = Zeroizing::new(pin.to_string());
    let credential =
        tokio::task::spawn_blocking(move || PinCredential::create(&pin, &algorithm, set_at))
            .await
            .map_err(|e| GuardError::Task(e.to_string()))??;
    Ok(credential)
}

async fn check_pin(credential: &PinCredential, pin: &str) -> Result<bool> {
    let credential = credential.clone();
    let pin = Zeroizing::new(pin.to_string());
    tokio::task::spawn_blocking(move || credential.verify(&pin))
        .await
        .map_err(|e| GuardError::Task(e.to_string()))
}
