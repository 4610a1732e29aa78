//! Error types for the Veil core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("PIN must be {0}-{1} digits")]
    InvalidPinLength(usize, usize),

    #[error("PIN must contain only digits")]
    InvalidPinFormat,

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("No secure entropy source available: {0}")]
    Entropy(String),

    #[error("Unsupported PIN algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Corrupted PIN credential: {0}")]
    Corrupted(String),
}
