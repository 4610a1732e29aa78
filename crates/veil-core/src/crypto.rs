//! PIN cryptography
//!
//! Stateless helpers for turning a short numeric PIN into a slow,
//! salted PBKDF2-HMAC-SHA-256 hash and checking a PIN against one.
//!
//! Every function is pure apart from salt generation. Derived key material is
//! wrapped in [`Zeroizing`] so it is wiped when dropped.

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroizing;

use crate::credential::AlgorithmId;
use crate::error::{Error, Result};

/// PBKDF2 iteration count for newly created credentials
pub const PBKDF2_ITERATIONS: u32 = 120_000;

/// Salt size in bytes (128 bits)
pub const SALT_LEN: usize = 16;

/// Derived key size in bytes (256 bits)
pub const KEY_LEN: usize = 32;

/// Hex-encoded output of [`hash_pin`]
#[derive(Clone, PartialEq, Eq)]
pub struct HashedPin {
    /// Derived key, 64 hex chars
    pub hash_hex: String,
    /// Salt, 32 hex chars
    pub salt_hex: String,
}

impl std::fmt::Debug for HashedPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashedPin")
            .field("hash_hex", &"<redacted>")
            .field("salt_hex", &"<redacted>")
            .finish()
    }
}

/// Generate a random 16-byte salt
///
/// Uses the OS entropy source. If that fails, falls back to the thread-local
/// CSPRNG (itself seeded from the OS). If neither can produce bytes the call
/// fails rather than returning predictable output.
pub fn random_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];

    if let Err(os_err) = OsRng.try_fill_bytes(&mut salt) {
        warn!("OS entropy source failed ({}), falling back to thread RNG", os_err);
        rand::thread_rng()
            .try_fill_bytes(&mut salt)
            .map_err(|e| Error::Entropy(format!("os: {}; fallback: {}", os_err, e)))?;
    }

    Ok(salt)
}

/// Derive a 32-byte key from a PIN with the current default parameters
pub fn derive_key(pin: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    pbkdf2_sha256(pin, salt, PBKDF2_ITERATIONS)
}

/// Derive a 32-byte key under an explicit algorithm
///
/// Credentials remember the algorithm they were created with, so this is what
/// verification uses.
pub fn derive_key_with(
    algorithm: &AlgorithmId,
    pin: &str,
    salt: &[u8],
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    match algorithm {
        AlgorithmId::Pbkdf2Sha256 { iterations } => Ok(pbkdf2_sha256(pin, salt, *iterations)),
        AlgorithmId::Unknown(id) => Err(Error::UnsupportedAlgorithm(id.clone())),
    }
}

fn pbkdf2_sha256(pin: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(pin.as_bytes(), salt, iterations, &mut key[..]);
    key
}

/// Lowercase hex encoding
pub fn to_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(bytes)
}

/// Decode hex, rejecting odd-length or non-hex input outright
pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| Error::InvalidHex(e.to_string()))
}

/// Compare two strings in time independent of where they first differ
///
/// Strings of different length return false immediately; length is not secret.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Hash a PIN with a fresh salt under the default algorithm
pub fn hash_pin(pin: &str) -> Result<HashedPin> {
    hash_pin_with(&AlgorithmId::default(), pin)
}

/// Hash a PIN with a fresh salt under an explicit algorithm
pub fn hash_pin_with(algorithm: &AlgorithmId, pin: &str) -> Result<HashedPin> {
    let salt = random_salt()?;
    let key = derive_key_with(algorithm, pin, &salt)?;

    Ok(HashedPin {
        hash_hex: to_hex(&key[..]),
        salt_hex: to_hex(salt),
    })
}

/// Verify a PIN against a stored hash and salt under the default algorithm
pub fn verify_pin(pin: &str, stored_hash_hex: &str, stored_salt_hex: &str) -> bool {
    verify_pin_with(&AlgorithmId::default(), pin, stored_hash_hex, stored_salt_hex)
}

/// Verify a PIN against a stored hash and salt under an explicit algorithm
///
/// Malformed salt hex or an unknown algorithm verifies as false.
pub fn verify_pin_with(
    algorithm: &AlgorithmId,
    pin: &str,
    stored_hash_hex: &str,
    stored_salt_hex: &str,
) -> bool {
    let salt = match from_hex(stored_salt_hex) {
        Ok(salt) => salt,
        Err(_) => return false,
    };

    let key = match derive_key_with(algorithm, pin, &salt) {
        Ok(key) => key,
        Err(e) => {
            warn!("Cannot verify PIN: {}", e);
            return false;
        }
    };

    let derived_hex = Zeroizing::new(to_hex(&key[..]));
    constant_time_eq(&derived_hex, stored_hash_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cheap parameters so tests that only exercise plumbing stay fast
    fn fast() -> AlgorithmId {
        AlgorithmId::Pbkdf2Sha256 { iterations: 1_000 }
    }

    #[test]
    fn test_pbkdf2_known_vector() {
        // RFC 7914 section 11, first 32 bytes of P="passwd", S="salt", c=1
        let algorithm = AlgorithmId::Pbkdf2Sha256 { iterations: 1 };
        let key = derive_key_with(&algorithm, "passwd", b"salt").unwrap();
        assert_eq!(
            to_hex(&key[..]),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn test_derive_key_deterministic() {
        let salt = [1u8; SALT_LEN];
        let key1 = derive_key("1234", &salt);
        let key2 = derive_key("1234", &salt);
        assert_eq!(*key1, *key2, "Same PIN and salt should produce same key");
        assert_eq!(key1.len(), KEY_LEN);
    }

    #[test]
    fn test_derive_key_different_pins() {
        let salt = [1u8; SALT_LEN];
        let algorithm = fast();
        let key1 = derive_key_with(&algorithm, "1234", &salt).unwrap();
        let key2 = derive_key_with(&algorithm, "5678", &salt).unwrap();
        assert_ne!(*key1, *key2);
    }

    #[test]
    fn test_default_round_trip() {
        let hashed = hash_pin("482913").unwrap();
        assert_eq!(hashed.hash_hex.len(), 64);
        assert_eq!(hashed.salt_hex.len(), 32);
        assert!(verify_pin("482913", &hashed.hash_hex, &hashed.salt_hex));
        assert!(!verify_pin("000000", &hashed.hash_hex, &hashed.salt_hex));
    }

    #[test]
    fn test_salt_uniqueness() {
        let algorithm = fast();
        let a = hash_pin_with(&algorithm, "1234").unwrap();
        let b = hash_pin_with(&algorithm, "1234").unwrap();
        assert_ne!(a.salt_hex, b.salt_hex);
        assert_ne!(a.hash_hex, b.hash_hex);
    }

    #[test]
    fn test_random_salt_not_zero() {
        let salt = random_salt().unwrap();
        assert_ne!(salt, [0u8; SALT_LEN]);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(from_hex("abc"), Err(Error::InvalidHex(_))));
        assert!(matches!(from_hex("zz"), Err(Error::InvalidHex(_))));
        assert_eq!(from_hex("00ff").unwrap(), vec![0x00, 0xff]);
        assert_eq!(to_hex([0xde_u8, 0xad]), "dead");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abcd", "abcd"));
        assert!(!constant_time_eq("abcd", "abce"));
        assert!(!constant_time_eq("abcd", "abc"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn test_malformed_salt_verifies_false() {
        let algorithm = fast();
        let hashed = hash_pin_with(&algorithm, "1234").unwrap();
        assert!(!verify_pin_with(&algorithm, "1234", &hashed.hash_hex, "not-hex"));
        assert!(!verify_pin_with(&algorithm, "1234", &hashed.hash_hex, "abc"));
    }

    #[test]
    fn test_unknown_algorithm_verifies_false() {
        let hashed = hash_pin_with(&fast(), "1234").unwrap();
        let unknown = AlgorithmId::Unknown("argon2id".into());
        assert!(!verify_pin_with(&unknown, "1234", &hashed.hash_hex, &hashed.salt_hex));
        assert!(matches!(
            hash_pin_with(&unknown, "1234"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_iterations_are_part_of_the_hash() {
        let hashed = hash_pin_with(&fast(), "1234").unwrap();
        let other = AlgorithmId::Pbkdf2Sha256 { iterations: 1_001 };
        assert!(!verify_pin_with(&other, "1234", &hashed.hash_hex, &hashed.salt_hex));
    }

    #[test]
    fn test_hashed_pin_debug_redacts() {
        let hashed = hash_pin_with(&fast(), "1234").unwrap();
        let debug = format!("{:?}", hashed);
        assert!(!debug.contains(&hashed.hash_hex));
        assert!(!debug.contains(&hashed.salt_hex));
    }
}
