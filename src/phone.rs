//! Phone number normalisation shared by request intake, the telephony
//! webhook and recording reconciliation.
//!
//! Canonical form is digits only with a leading country code, e.g.
//! `79161234567`. Russian trunk-prefix `8` is rewritten to `7`, and bare
//! 10-digit mobile numbers get a `7` prefix.

use crate::error::{Error, Result};

pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() == 11 && digits.starts_with('8') {
        format!("7{}", &digits[1..])
    } else if digits.len() == 10 && digits.starts_with('9') {
        format!("7{}", digits)
    } else {
        digits
    }
}

/// Normalise and check that 9 to 15 digits remain.
pub fn validate_phone(raw: &str) -> Result<String> {
    let phone = normalize_phone(raw);
    if (9..=15).contains(&phone.len()) {
        Ok(phone)
    } else {
        Err(Error::validation(format!(
            "Invalid phone number '{}': expected 9 to 15 digits",
            raw
        )))
    }
}
