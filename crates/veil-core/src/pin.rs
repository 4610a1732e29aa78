//! PIN format rules

use crate::error::{Error, Result};

/// Minimum PIN length
pub const MIN_PIN_LENGTH: usize = 4;
/// Maximum PIN length
pub const MAX_PIN_LENGTH: usize = 8;

/// Validate PIN format
///
/// A valid PIN is 4 to 8 ASCII digits. Nothing else is accepted, including
/// non-ASCII digits such as Arabic-Indic numerals.
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() < MIN_PIN_LENGTH || pin.len() > MAX_PIN_LENGTH {
        return Err(Error::InvalidPinLength(MIN_PIN_LENGTH, MAX_PIN_LENGTH));
    }

    if !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidPinFormat);
    }

    Ok(())
}
