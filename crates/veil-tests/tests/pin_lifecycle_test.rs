//! End-to-end PIN lifecycle tests for Veil
//!
//! These tests drive the policy manager over real file-backed stores and
//! over several devices sharing one remote record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::tempdir;

use veil_core::AlgorithmId;
use veil_guard::{
    AccountId, FileRemoteStore, GuardConfig, ManualClock, MemoryLocalStore,
    MemoryRemoteStore, PinPolicyManager, PinStatus, PolicyConfig, RemotePinStore,
};

fn account() -> AccountId {
    AccountId::new("user-42").unwrap()
}

fn fast_policy() -> PolicyConfig {
    PolicyConfig {
        algorithm: AlgorithmId::Pbkdf2Sha256 { iterations: 1_000 },
        ..Default::default()
    }
}

/// Set, verify, lock out, wait out the lockout, verify again
#[tokio::test]
async fn test_full_pin_lifecycle() {
    let temp_dir = tempdir().unwrap();
    let config = GuardConfig {
        local_store_path: temp_dir.path().join("local"),
        remote_store_path: temp_dir.path().join("remote"),
        ..Default::default()
    };
    config.ensure_directories().unwrap();

    let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let remote = Arc::new(FileRemoteStore::new(config.remote_store_path.clone()).unwrap());

    let manager = PinPolicyManager::new(
        account(),
        config.policy.clone(),
        config.open_local_store().unwrap(),
        remote.clone(),
    )
    .with_clock(clock.clone());

    // ==========================================
    // STEP 1: Set and verify
    // ==========================================
    assert_eq!(manager.status().await.unwrap(), PinStatus::Unset);
    manager.set_pin("482913").await.unwrap();
    assert!(manager.verify_pin("482913").await);

    // ==========================================
    // STEP 2: Five wrong guesses lock the account
    // ==========================================
    assert!(!manager.verify_pin("000000").await);
    assert_eq!(manager.lockout_state().await.fail_count, 1);

    for _ in 0..4 {
        assert!(!manager.verify_pin("000000").await);
    }
    let lockout = manager.lockout_state().await;
    assert_eq!(lockout.fail_count, 5);
    assert!(matches!(
        manager.status().await.unwrap(),
        PinStatus::Locked { .. }
    ));

    // ==========================================
    // STEP 3: Correct PIN refused while locked
    // ==========================================
    assert!(!manager.verify_pin("482913").await);
    assert_eq!(manager.lockout_state().await.fail_count, 5);
    assert_eq!(manager.remaining_lockout_time().await, Duration::from_secs(300));

    // ==========================================
    // STEP 4: After 300 seconds the correct PIN works
    // ==========================================
    clock.advance(chrono::Duration::seconds(300));
    assert_eq!(manager.remaining_lockout_time().await, Duration::ZERO);
    assert!(manager.verify_pin("482913").await);
    assert_eq!(manager.lockout_state().await.fail_count, 0);
    assert_eq!(manager.status().await.unwrap(), PinStatus::Set);

    // ==========================================
    // STEP 5: Everything was persisted
    // ==========================================
    assert!(config.remote_store_path.join("user-42.json").exists());
    let document = remote.fetch(&account()).await.unwrap().unwrap();
    assert_eq!(document.algorithm.as_deref(), Some("pbkdf2_sha256"));
    assert_eq!(document.fail_count, Some(0));
    assert_eq!(document.locked_until, None);

    let reopened = PinPolicyManager::new(
        account(),
        config.policy.clone(),
        config.open_local_store().unwrap(),
        config.open_remote_store().unwrap(),
    );
    assert!(reopened.check_status().await);
    assert!(reopened.verify_pin("482913").await);
}

/// A lockout tripped on one device holds on another
#[tokio::test]
async fn test_lockout_shared_across_devices() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let device = |local: Arc<MemoryLocalStore>| {
        PinPolicyManager::new(account(), fast_policy(), local, remote.clone())
            .with_clock(clock.clone())
    };

    let phone = device(Arc::new(MemoryLocalStore::new()));
    phone.set_pin("2468").await.unwrap();
    for _ in 0..5 {
        phone.verify_pin("1357").await;
    }

    let tablet = device(Arc::new(MemoryLocalStore::new()));
    assert!(!tablet.verify_pin("2468").await);
    assert!(tablet.remaining_lockout_time().await > Duration::ZERO);
}

/// A device that synced early cannot erase a lockout tripped elsewhere
#[tokio::test]
async fn test_lockout_tripped_elsewhere_not_overwritten() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let device = || {
        PinPolicyManager::new(
            account(),
            fast_policy(),
            Arc::new(MemoryLocalStore::new()),
            remote.clone(),
        )
        .with_clock(clock.clone())
    };

    let phone = device();
    let tablet = device();
    phone.set_pin("2468").await.unwrap();

    // The tablet has already seen the record once
    assert!(!tablet.verify_pin("1357").await);
    assert_eq!(tablet.lockout_state().await.fail_count, 1);

    for _ in 0..5 {
        assert!(!phone.verify_pin("1357").await);
    }
    let tripped = remote.fetch(&account()).await.unwrap().unwrap().lockout();
    assert!(tripped.fail_count >= 5);
    assert!(tripped.locked_until.is_some());

    // Wrong and right guesses on the tablet are both refused
    for _ in 0..3 {
        assert!(!tablet.verify_pin("1357").await);
    }
    assert!(!tablet.verify_pin("2468").await);
    assert_eq!(tablet.remaining_lockout_time().await, Duration::from_secs(300));

    let after = remote.fetch(&account()).await.unwrap().unwrap().lockout();
    assert_eq!(after, tripped);
}

/// Setting a PIN is not blocked by a device cache the remote no longer backs
#[tokio::test]
async fn test_set_after_remove_elsewhere() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let phone = PinPolicyManager::new(
        account(),
        fast_policy(),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
    );
    let tablet_cache = Arc::new(MemoryLocalStore::new());
    let tablet = PinPolicyManager::new(account(), fast_policy(), tablet_cache.clone(), remote.clone());

    phone.set_pin("2468").await.unwrap();
    assert!(tablet.verify_pin("2468").await);
    phone.remove_pin("2468").await.unwrap();

    // Restarted tablet with its cache still warm
    let tablet = PinPolicyManager::new(account(), fast_policy(), tablet_cache.clone(), remote.clone());
    tablet.set_pin("97531").await.unwrap();

    assert!(tablet.verify_pin("97531").await);
    assert!(phone.verify_pin("97531").await);
    assert!(!phone.verify_pin("2468").await);
}

/// A PIN changed on one device is picked up by another with a warm cache
#[tokio::test]
async fn test_change_propagates_to_other_device() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let phone = PinPolicyManager::new(
        account(),
        fast_policy(),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
    );
    let tablet_cache = Arc::new(MemoryLocalStore::new());
    let tablet = PinPolicyManager::new(account(), fast_policy(), tablet_cache.clone(), remote.clone());

    phone.set_pin("2468").await.unwrap();
    assert!(tablet.verify_pin("2468").await);
    assert_eq!(tablet_cache.len().await, 2);

    phone.change_pin("2468", "97531").await.unwrap();

    assert!(tablet.verify_pin("97531").await);
    assert_eq!(tablet.lockout_state().await.fail_count, 0);
    assert!(!tablet.verify_pin("2468").await);
}

/// Removing the PIN on one device makes it unset everywhere
#[tokio::test]
async fn test_remove_propagates_to_other_device() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let phone = PinPolicyManager::new(
        account(),
        fast_policy(),
        Arc::new(MemoryLocalStore::new()),
        remote.clone(),
    );
    let tablet_cache = Arc::new(MemoryLocalStore::new());
    let tablet = PinPolicyManager::new(account(), fast_policy(), tablet_cache.clone(), remote.clone());

    phone.set_pin("2468").await.unwrap();
    assert!(tablet.check_status().await);

    phone.remove_pin("2468").await.unwrap();
    assert!(!phone.check_status().await);

    // The tablet notices on its next mismatch and drops its cache
    assert!(!tablet.verify_pin("1111").await);
    assert!(!tablet.check_status().await);
    assert!(tablet_cache.is_empty().await);
    assert_eq!(tablet.lockout_state().await.fail_count, 0);
}

/// Each account's record and counters are independent
#[tokio::test]
async fn test_accounts_are_isolated() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let local = Arc::new(MemoryLocalStore::new());
    let alice = PinPolicyManager::new(
        AccountId::new("alice").unwrap(),
        fast_policy(),
        local.clone(),
        remote.clone(),
    );
    let bob = PinPolicyManager::new(
        AccountId::new("bob").unwrap(),
        fast_policy(),
        local.clone(),
        remote.clone(),
    );

    alice.set_pin("1234").await.unwrap();
    assert!(!bob.check_status().await);
    assert!(!bob.verify_pin("1234").await);

    bob.set_pin("5678").await.unwrap();
    for _ in 0..5 {
        bob.verify_pin("0000").await;
    }
    assert!(alice.verify_pin("1234").await);
    assert_eq!(alice.lockout_state().await.fail_count, 0);
}
