//! Document identifiers and sharded-path utilities.
//!
//! HMS identifies every stored document with a *canonical* UUID representation:
//! **32 lowercase hexadecimal characters** (no hyphens). The same value is used
//! in URLs, in the document store and in on-disk paths.
//!
//! This crate provides:
//! - [`DocumentId`], a wrapper that guarantees the canonical format once constructed.
//! - Deterministic ids derived from a natural key ([`DocumentId::derived`]), used where
//!   uniqueness must be enforced by the store rather than by a racy lookup.
//! - [`Sha256Hash`], a validated content digest used by object storage.
//!
//! ## Sharded directory layout
//! For a canonical id `u`, file-backed storage places data under:
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`
//!
//! Example:
//! `hms_data/patients/55/0e/550e8400e29b41d4a716446655440000/`

mod service;

pub use service::{DocumentId, Sha256Hash, Uuid};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
