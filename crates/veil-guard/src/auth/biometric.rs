//! Biometric prompt seam
//!
//! The prompt itself (platform UI, sensor) lives outside this crate. The
//! manager only consumes its yes/no answer.

use async_trait::async_trait;

/// Platform biometric prompt
#[async_trait]
pub trait BiometricPrompt: Send + Sync {
    /// Show the prompt with `reason` and report whether the user passed
    async fn authenticate(&self, reason: &str) -> bool;
}
