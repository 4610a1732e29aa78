//! Fixed-window lockout for brute-force protection
//!
//! After `max_fail_attempts` consecutive failures the account is locked for
//! `lockout_duration_secs`. Lockout is tracked as an absolute wall-clock
//! deadline, so it survives suspension and restart without a running timer.
//!
//! - 1-4 failures: no lockout
//! - 5th failure: locked for 5 minutes
//! - each further failure after expiry: locked again for 5 minutes

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lockout policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutPolicy {
    /// Consecutive failures that trip the lockout
    pub max_fail_attempts: u32,
    /// Length of the lockout window in seconds
    pub lockout_duration_secs: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_fail_attempts: 5,
            lockout_duration_secs: 300,
        }
    }
}

impl LockoutPolicy {
    /// Get the lockout duration for the given number of failed attempts
    /// Returns None if not yet locked out
    pub fn lockout_duration(&self, fail_count: u32) -> Option<Duration> {
        if !self.is_tripped(fail_count) {
            return None;
        }
        Some(Duration::from_secs(self.lockout_duration_secs))
    }

    /// Whether `fail_count` has reached the trip threshold
    pub fn is_tripped(&self, fail_count: u32) -> bool {
        fail_count >= self.max_fail_attempts
    }

    /// Failures left before the next lockout
    pub fn attempts_remaining(&self, fail_count: u32) -> u32 {
        self.max_fail_attempts.saturating_sub(fail_count)
    }

    /// Get a human-readable description of the lockout state at `now`
    pub fn describe_lockout(&self, state: &LockoutState, now: DateTime<Utc>) -> String {
        if state.is_locked_at(now) {
            let secs = state.remaining_at(now).as_secs().max(1);
            if secs < 60 {
                format!("Locked for {} seconds", secs)
            } else {
                format!("Locked for {} minutes", secs.div_ceil(60))
            }
        } else {
            format!(
                "{} attempts remaining",
                self.attempts_remaining(state.fail_count)
            )
        }
    }
}

/// Per-account failure counters
///
/// `locked_until` is only ever set by the failure that brings `fail_count`
/// to the threshold (or beyond), and both are cleared together on success.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    /// Consecutive failed verifications
    pub fail_count: u32,
    /// End of the active lockout window
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    /// Whether a lockout window is active at `now`
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Time left in the lockout window, zero when not locked
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.locked_until
            .and_then(|until| (until - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Count a failed verification
    ///
    /// Returns true if this failure started a lockout window.
    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &LockoutPolicy) -> bool {
        self.fail_count = self.fail_count.saturating_add(1);

        match policy.lockout_duration(self.fail_count) {
            Some(duration) => {
                let until = chrono::Duration::from_std(duration)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.locked_until = Some(until);
                true
            }
            None => false,
        }
    }

    /// Clear counters after a successful verification
    pub fn record_success(&mut self) {
        self.fail_count = 0;
        self.locked_until = None;
    }

    /// Whether there is nothing to persist
    pub fn is_clear(&self) -> bool {
        self.fail_count == 0 && self.locked_until.is_none()
    }

    /// Fold in counters observed elsewhere, keeping the stricter of each
    pub fn merge(&mut self, other: &LockoutState) {
        self.fail_count = self.fail_count.max(other.fail_count);
        self.locked_until = match (self.locked_until, other.locked_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}
