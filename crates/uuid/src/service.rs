//! Internal implementation of document identifiers and content hashes.

use crate::{UuidError, UuidResult};
use std::path::{Path, PathBuf};
use std::{fmt, str::FromStr};

/// Re-exported for convenience.
pub use ::uuid::Uuid;

/// Namespace for name-based (v5) identifiers derived from natural keys.
const HMS_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a7e_4d0b_4c3e_9a51_8e27_b3d4_c019);

/// HMS's canonical document identifier (32 lowercase hex characters, no hyphens).
///
/// Once constructed, the contained UUID is guaranteed to be in canonical form.
///
/// # Construction
/// - [`DocumentId::new`] generates a fresh random identifier.
/// - [`DocumentId::parse`] validates an externally supplied identifier (path parameter,
///   request body, CLI argument).
/// - [`DocumentId::derived`] computes a deterministic identifier from a scope and key.
///
/// # Errors
/// [`DocumentId::parse`] returns [`UuidError::InvalidInput`] if the input is not already
/// canonical. Hyphenated and uppercase forms are rejected, not normalised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(Uuid);

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentId {
    /// Generates a new random (v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Validates and parses an identifier that must already be in canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if `input` is not 32 lowercase hex characters.
    pub fn parse(input: &str) -> UuidResult<Self> {
        if Self::is_canonical(input) {
            return Uuid::parse_str(input)
                .map(Self)
                .map_err(|e| UuidError::InvalidInput(e.to_string()));
        }
        Err(UuidError::InvalidInput(format!(
            "id must be 32 lowercase hex characters without hyphens, got: '{}'",
            input
        )))
    }

    /// Derives a deterministic identifier from a scope and a natural key.
    ///
    /// The same `(scope, key)` pair always yields the same id, so creating a document
    /// under a derived id fails with "already exists" on the second attempt. This is
    /// how one-to-one relationships (prescription to invoice, e-mail to user) are kept
    /// unique without a lookup-then-insert race.
    pub fn derived(scope: &str, key: &str) -> Self {
        let name = format!("{scope}:{key}");
        Self(Uuid::new_v5(&HMS_NAMESPACE, name.as_bytes()))
    }

    /// Returns the underlying `uuid::Uuid`.
    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true if `input` is in canonical form.
    ///
    /// Purely syntactic: exactly 32 bytes of `0-9` / `a-f`.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Returns `parent_dir/<s1>/<s2>/<id>/` where `s1`/`s2` are the first two
    /// pairs of hex characters of this id.
    pub fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
        let canonical = self.0.simple().to_string();
        let s1 = &canonical[0..2];
        let s2 = &canonical[2..4];
        parent_dir.join(s1).join(s2).join(&canonical)
    }

    /// The first eight hex characters, uppercased. Used for human-facing numbers.
    pub fn short_code(&self) -> String {
        self.0.simple().to_string()[..8].to_uppercase()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for DocumentId {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentId::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for DocumentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for DocumentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DocumentId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A SHA-256 digest in lowercase hex (64 characters).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self(hex)
    }

    pub fn parse(input: &str) -> UuidResult<Self> {
        if input.len() == 64
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Ok(Self(input.to_owned()));
        }
        Err(UuidError::InvalidInput(format!(
            "sha256 hash must be 64 lowercase hex characters, got: '{}'",
            input
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Sha256Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Sha256Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Sha256Hash::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_generates_canonical_id() {
        let id = DocumentId::new();
        let canonical = id.to_string();

        assert_eq!(canonical.len(), 32);
        assert!(DocumentId::is_canonical(&canonical));
    }

    #[test]
    fn test_parse_valid_canonical_id() {
        let canonical = "550e8400e29b41d4a716446655440000";
        let id = DocumentId::parse(canonical).expect("canonical id should parse");
        assert_eq!(id.to_string(), canonical);
    }

    #[test]
    fn test_parse_rejects_hyphenated_id() {
        let result = DocumentId::parse("550e8400-e29b-41d4-a716-446655440000");
        match result {
            Err(UuidError::InvalidInput(msg)) => {
                assert!(msg.contains("32 lowercase hex characters"));
            }
            _ => panic!("Expected InvalidInput error"),
        }
    }

    #[test]
    fn test_parse_rejects_uppercase_and_bad_lengths() {
        assert!(DocumentId::parse("550E8400E29B41D4A716446655440000").is_err());
        assert!(DocumentId::parse("550e8400e29b41d4a71644665544000").is_err());
        assert!(DocumentId::parse("550e8400e29b41d4a7164466554400000").is_err());
        assert!(DocumentId::parse("550e8400e29b41d4a716446655440zzz").is_err());
        assert!(DocumentId::parse("").is_err());
    }

    #[test]
    fn test_derived_is_deterministic_and_scoped() {
        let a = DocumentId::derived("invoice-for-prescription", "abc");
        let b = DocumentId::derived("invoice-for-prescription", "abc");
        let c = DocumentId::derived("user-email", "abc");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(DocumentId::is_canonical(&a.to_string()));
    }

    #[test]
    fn test_sharded_dir_structure() {
        let id = DocumentId::parse("550e8400e29b41d4a716446655440000").unwrap();
        let sharded = id.sharded_dir(Path::new("/hms_data/patients"));

        assert_eq!(
            sharded,
            PathBuf::from("/hms_data/patients/55/0e/550e8400e29b41d4a716446655440000")
        );
    }

    #[test]
    fn test_short_code() {
        let id = DocumentId::parse("550e8400e29b41d4a716446655440000").unwrap();
        assert_eq!(id.short_code(), "550E8400");
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let id = DocumentId::parse("00112233445566778899aabbccddeeff").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00112233445566778899aabbccddeeff\"");

        let bad: Result<DocumentId, _> = serde_json::from_str("\"not-an-id\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_sha256_hash_parse() {
        let hash = Sha256Hash::from_bytes(&[0xab; 32]);
        assert_eq!(hash.as_str().len(), 64);
        assert!(Sha256Hash::parse(hash.as_str()).is_ok());
        assert!(Sha256Hash::parse("abc").is_err());
    }
}
