//! Veil Core - PIN cryptography and credential types
//!
//! This crate provides the pure building blocks of hidden-content protection:
//! - PBKDF2-HMAC-SHA-256 derivation of PIN hashes with random salts
//! - Constant-time verification of a PIN against a stored credential
//! - PIN format validation
//! - The versioned credential record shared by every store
//!
//! Nothing here performs I/O. Storage and lockout live in `veil-guard`.

pub mod credential;
pub mod crypto;
pub mod error;
pub mod pin;

pub use credential::{AlgorithmId, PinCredential};
pub use crypto::{HashedPin, KEY_LEN, PBKDF2_ITERATIONS, SALT_LEN};
pub use error::{Error, Result};
pub use pin::{validate_pin, MAX_PIN_LENGTH, MIN_PIN_LENGTH};
