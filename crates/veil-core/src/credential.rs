//! Persisted PIN credential and its algorithm identifier
//!
//! A [`PinCredential`] is the only secret material ever stored: the derived
//! hash, its salt, and the parameters used to derive it. Hash and salt are
//! always present together. A record carrying only one of them is corrupted
//! and must be treated as "not set".

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::{self, PBKDF2_ITERATIONS};
use crate::error::{Error, Result};

/// Wire identifier for PBKDF2-HMAC-SHA-256
pub const PBKDF2_SHA256_ID: &str = "pbkdf2_sha256";

/// Key derivation scheme a credential was created with
///
/// This is an open enumeration: identifiers this build does not understand
/// are kept verbatim in [`AlgorithmId::Unknown`] so they survive a round trip
/// through an older client untouched.
///
/// Wire form is `pbkdf2_sha256` for the default 120,000 iterations and
/// `pbkdf2_sha256$i=<n>` for any other count.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AlgorithmId {
    /// PBKDF2 with HMAC-SHA-256 as the PRF
    Pbkdf2Sha256 { iterations: u32 },
    /// Identifier written by a newer client
    Unknown(String),
}

impl AlgorithmId {
    /// Whether this build can derive keys under this algorithm
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl Default for AlgorithmId {
    fn default() -> Self {
        Self::Pbkdf2Sha256 {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pbkdf2Sha256 { iterations } if *iterations == PBKDF2_ITERATIONS => {
                write!(f, "{}", PBKDF2_SHA256_ID)
            }
            Self::Pbkdf2Sha256 { iterations } => write!(f, "{}$i={}", PBKDF2_SHA256_ID, iterations),
            Self::Unknown(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for AlgorithmId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == PBKDF2_SHA256_ID {
            return Ok(Self::default());
        }

        let iterations = s
            .strip_prefix(PBKDF2_SHA256_ID)
            .and_then(|rest| rest.strip_prefix("$i="))
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|n| *n > 0);

        Ok(match iterations {
            Some(iterations) => Self::Pbkdf2Sha256 { iterations },
            None => Self::Unknown(s.to_string()),
        })
    }
}

impl Serialize for AlgorithmId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AlgorithmId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        // Infallible
        Ok(s.parse::<AlgorithmId>().unwrap_or_default())
    }
}

/// Secret material for one account's hidden-content PIN
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCredential {
    /// Hex-encoded derived key
    pub hash_hex: String,
    /// Hex-encoded salt
    pub salt_hex: String,
    /// Derivation scheme
    pub algorithm: AlgorithmId,
    /// When the PIN was set, if the record carries it
    pub set_at: Option<DateTime<Utc>>,
}

impl PinCredential {
    /// Hash a PIN under `algorithm` with a fresh salt
    ///
    /// The PIN format is not checked here; see [`crate::validate_pin`].
    pub fn create(pin: &str, algorithm: &AlgorithmId, set_at: DateTime<Utc>) -> Result<Self> {
        let hashed = crypto::hash_pin_with(algorithm, pin)?;
        Ok(Self {
            hash_hex: hashed.hash_hex,
            salt_hex: hashed.salt_hex,
            algorithm: algorithm.clone(),
            set_at: Some(set_at),
        })
    }

    /// Rebuild a credential from independently stored fields
    ///
    /// Empty strings count as absent. Both absent means no PIN is set and
    /// yields `Ok(None)`. One without the other, or fields that are not hex,
    /// yield [`Error::Corrupted`]. A missing algorithm means the original
    /// fixed scheme.
    pub fn from_parts(
        hash_hex: Option<&str>,
        salt_hex: Option<&str>,
        algorithm: Option<&str>,
        set_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Self>> {
        let hash_hex = hash_hex.filter(|s| !s.is_empty());
        let salt_hex = salt_hex.filter(|s| !s.is_empty());

        let (hash_hex, salt_hex) = match (hash_hex, salt_hex) {
            (None, None) => return Ok(None),
            (Some(hash), Some(salt)) => (hash, salt),
            (Some(_), None) => return Err(Error::Corrupted("hash present without salt".into())),
            (None, Some(_)) => return Err(Error::Corrupted("salt present without hash".into())),
        };

        crypto::from_hex(hash_hex).map_err(|e| Error::Corrupted(format!("hash: {}", e)))?;
        crypto::from_hex(salt_hex).map_err(|e| Error::Corrupted(format!("salt: {}", e)))?;

        let algorithm = algorithm
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<AlgorithmId>().unwrap_or_default())
            .unwrap_or_default();

        Ok(Some(Self {
            hash_hex: hash_hex.to_string(),
            salt_hex: salt_hex.to_string(),
            algorithm,
            set_at,
        }))
    }

    /// Check a PIN against this credential under its own algorithm
    pub fn verify(&self, pin: &str) -> bool {
        crypto::verify_pin_with(&self.algorithm, pin, &self.hash_hex, &self.salt_hex)
    }

    /// Whether two credentials hold the same secret, ignoring `set_at`
    pub fn same_secret(&self, other: &Self) -> bool {
        crypto::constant_time_eq(&self.hash_hex, &other.hash_hex)
            && self.salt_hex == other.salt_hex
            && self.algorithm == other.algorithm
    }
}

impl fmt::Debug for PinCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinCredential")
            .field("hash_hex", &"<redacted>")
            .field("salt_hex", &"<redacted>")
            .field("algorithm", &format_args!("{}", self.algorithm))
            .field("set_at", &self.set_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> AlgorithmId {
        AlgorithmId::Pbkdf2Sha256 { iterations: 1_000 }
    }

    #[test]
    fn test_algorithm_wire_form() {
        assert_eq!(AlgorithmId::default().to_string(), "pbkdf2_sha256");
        assert_eq!(fast().to_string(), "pbkdf2_sha256$i=1000");

        assert_eq!("pbkdf2_sha256".parse::<AlgorithmId>().unwrap(), AlgorithmId::default());
        assert_eq!("pbkdf2_sha256$i=1000".parse::<AlgorithmId>().unwrap(), fast());
    }

    #[test]
    fn test_unknown_algorithm_preserved() {
        for id in ["argon2id", "pbkdf2_sha256$i=0", "pbkdf2_sha256$i=abc", "pbkdf2_sha512"] {
            let parsed: AlgorithmId = id.parse().unwrap();
            assert_eq!(parsed, AlgorithmId::Unknown(id.to_string()));
            assert!(!parsed.is_supported());
            assert_eq!(parsed.to_string(), id);
        }
    }

    #[test]
    fn test_algorithm_serde_as_string() {
        let json = serde_json::to_string(&fast()).unwrap();
        assert_eq!(json, "\"pbkdf2_sha256$i=1000\"");
        let back: AlgorithmId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fast());
    }

    #[test]
    fn test_from_parts_not_set() {
        assert_eq!(PinCredential::from_parts(None, None, None, None), Ok(None));
        assert_eq!(PinCredential::from_parts(Some(""), Some(""), None, None), Ok(None));
    }

    #[test]
    fn test_from_parts_partial_is_corrupted() {
        let hash = "ab".repeat(32);
        let salt = "cd".repeat(16);
        assert!(matches!(
            PinCredential::from_parts(Some(&hash), None, None, None),
            Err(Error::Corrupted(_))
        ));
        assert!(matches!(
            PinCredential::from_parts(None, Some(&salt), None, None),
            Err(Error::Corrupted(_))
        ));
        assert!(matches!(
            PinCredential::from_parts(Some("xyz"), Some(&salt), None, None),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn test_from_parts_defaults_algorithm() {
        let hash = "ab".repeat(32);
        let salt = "cd".repeat(16);
        let credential = PinCredential::from_parts(Some(&hash), Some(&salt), None, None)
            .unwrap()
            .unwrap();
        assert_eq!(credential.algorithm, AlgorithmId::default());
    }

    #[test]
    fn test_create_and_verify() {
        let credential = PinCredential::create("4829", &fast(), Utc::now()).unwrap();
        assert!(credential.verify("4829"));
        assert!(!credential.verify("4828"));
        assert_eq!(credential.algorithm, fast());
    }

    #[test]
    fn test_same_secret_ignores_timestamp() {
        let credential = PinCredential::create("4829", &fast(), Utc::now()).unwrap();
        let mut copy = credential.clone();
        copy.set_at = None;
        assert!(credential.same_secret(&copy));

        let other = PinCredential::create("4829", &fast(), Utc::now()).unwrap();
        assert!(!credential.same_secret(&other));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credential = PinCredential::create("4829", &fast(), Utc::now()).unwrap();
        let debug = format!("{:?}", credential);
        assert!(!debug.contains(&credential.hash_hex));
        assert!(!debug.contains(&credential.salt_hex));
        assert!(debug.contains("pbkdf2_sha256$i=1000"));
    }
}
