//! Hidden-content PIN policy
//!
//! All access to hidden content goes through [`PinPolicyManager`].
//!
//! # Security Model
//!
//! - PIN is hashed with PBKDF2-HMAC-SHA-256 (120,000 iterations, 16-byte salt)
//! - Only hash, salt and algorithm are stored, never the PIN
//! - Lockout after 5 consecutive failures, for 5 minutes
//! - The remote record is authoritative; the device cache is only a fast path
//! - Verification failures do not reveal why they failed

mod biometric;
mod lockout;
mod manager;

pub use biometric::BiometricPrompt;
pub use lockout::{LockoutPolicy, LockoutState};
pub use manager::{PinPolicyManager, PolicyConfig};

use chrono::{DateTime, Utc};

/// PIN state for the signed-in account
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PinStatus {
    /// No PIN set anywhere
    Unset,
    /// PIN set and accepting attempts
    Set,
    /// Too many failures; attempts refused until the given time
    Locked { until: DateTime<Utc> },
}
