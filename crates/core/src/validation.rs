//! Input validation utilities.
//!
//! This module contains functions for validating user inputs to ensure they meet
//! safety and correctness requirements before being stored.

use crate::{HmsError, HmsResult};
use hms_types::NonEmptyText;

/// Maximum length of free-text fields such as notes and addresses.
pub const MAX_TEXT_LEN: usize = 4_000;

/// Validates a required text field, naming the field in the error.
pub fn required_text(field: &str, value: &str) -> HmsResult<NonEmptyText> {
    let text =
        NonEmptyText::new(value).map_err(|_| HmsError::invalid(format!("{field} is required")))?;
    check_len(field, text.as_str())?;
    Ok(text)
}

/// Normalises an optional text field: trimmed, with blank values treated as absent.
///
/// Update requests use the same rule, so sending `""` clears a field.
pub fn optional_text(field: &str, value: Option<String>) -> HmsResult<Option<String>> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) => {
            check_len(field, &v)?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

fn check_len(field: &str, value: &str) -> HmsResult<()> {
    if value.chars().count() > MAX_TEXT_LEN {
        return Err(HmsError::invalid(format!(
            "{field} exceeds maximum length of {MAX_TEXT_LEN} characters"
        )));
    }
    Ok(())
}

/// Validates a machine key (custom field keys): `[a-z0-9_]`, 1-64 characters.
///
/// # Errors
///
/// Returns a `HmsError::InvalidInput` if the key is empty, too long or contains other
/// characters.
pub fn validate_key(key: &str) -> HmsResult<()> {
    const MAX_KEY_LEN: usize = 64;

    if key.is_empty() {
        return Err(HmsError::invalid("key cannot be empty"));
    }

    if key.len() > MAX_KEY_LEN {
        return Err(HmsError::invalid(format!(
            "key exceeds maximum length of {} characters",
            MAX_KEY_LEN
        )));
    }

    let ok = key
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'_'));

    if !ok {
        return Err(HmsError::invalid(
            "key contains invalid characters (only lowercase letters, digits and '_' allowed)",
        ));
    }

    Ok(())
}

/// Validates a phone number loosely: digits with optional `+`, spaces, dashes and parentheses.
pub fn validate_phone(phone: &str) -> HmsResult<()> {
    let digits = phone.bytes().filter(u8::is_ascii_digit).count();
    let ok = phone
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'+' | b' ' | b'-' | b'(' | b')'));

    if !ok || !(5..=20).contains(&digits) {
        return Err(HmsError::invalid(format!("invalid phone number: {phone}")));
    }
    Ok(())
}
