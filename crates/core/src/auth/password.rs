//! Password hashing.
//!
//! Hashes are self-describing strings: `pbkdf2-sha256$<iterations>$<salt-hex>$<hash-hex>`, so
//! the iteration count can be raised later without invalidating existing credentials.

use crate::constants::MIN_PASSWORD_LEN;
use crate::{HmsError, HmsResult};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;

pub fn validate_password(password: &str) -> HmsResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(HmsError::invalid(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Derive from password + random salt using PBKDF2-SHA256.
pub fn hash_password(password: &str, iterations: u32) -> HmsResult<String> {
    if iterations == 0 {
        return Err(HmsError::PasswordHash("iterations must be positive".into()));
    }

    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hash = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut hash);

    Ok(format!(
        "{SCHEME}${iterations}${}${}",
        hex::encode(salt),
        hex::encode(hash)
    ))
}

/// Checks `password` against an encoded hash. Malformed hashes never verify.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };

    if scheme != SCHEME {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
        return false;
    };
    if iterations == 0 || expected.len() != HASH_LENGTH {
        return false;
    }

    let mut actual = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut actual);

    actual[..].ct_eq(&expected[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let encoded = hash_password("correct horse", 1_000).unwrap();
        assert!(encoded.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_password("correct horse", &encoded));
        assert!(!verify_password("battery staple", &encoded));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = hash_password("same password", 1_000).unwrap();
        let b = hash_password("same password", 1_000).unwrap();
        assert_ne!(a, b, "each hash must use a fresh salt");
    }

    #[test]
    fn malformed_hashes_never_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "bcrypt$10$aa$bb"));
        assert!(!verify_password("x", "pbkdf2-sha256$abc$aa$bb"));
        assert!(!verify_password("x", "pbkdf2-sha256$1000$zz$bb"));
        assert!(!verify_password("x", "pbkdf2-sha256$1000$aa$bb"));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("1234567").is_err());
        assert!(validate_password("12345678").is_ok());
    }
}
