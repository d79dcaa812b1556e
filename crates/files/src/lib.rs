//! HMS object storage
//!
//! Binary attachments (scanned referral letters, lab PDFs, ID photos) are kept out of the
//! document store. Documents hold [`FileMetadata`]; the bytes live here.
//!
//! ## Owner-scoped storage model
//!
//! Every owner (for example a patient) gets an isolated, content-addressed area:
//!
//! ```text
//! <root>/
//! └── <s1>/<s2>/<owner_id>/
//!     └── files/
//!         └── sha256/
//!             └── ab/
//!                 └── cd/
//!                     └── abcd3f9e…
//! ```
//!
//! - Objects are immutable: identical bytes for the same owner are rejected.
//! - Hashes are validated before any path is built, so callers cannot escape the root.
//! - Removing an owner removes its whole area.
//!
//! ## Example Usage
//!
//! ```no_run
//! use hms_files::FilesService;
//! use hms_uuid::DocumentId;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let owner = DocumentId::parse("550e8400e29b41d4a716446655440000")?;
//! let service = FilesService::new(Path::new("hms_data/objects"), owner)?;
//! let meta = service.add_bytes("referral.pdf", b"%PDF-1.7 ...")?;
//! let bytes = service.read(meta.hash.as_str())?;
//! # Ok(())
//! # }
//! ```

mod constants;
mod files;

pub use constants::FILES_FOLDER_NAME;
pub use files::{FileMetadata, FilesService};
pub use hms_uuid::DocumentId;

/// Failures of object storage.
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// The storage root is missing, not a directory, or cannot be resolved.
    #[error("object storage root unusable: {0}")]
    InvalidRootDirectory(String),

    #[error("rejected filename or hash: {0}")]
    InvalidPath(String),

    /// The owner already holds an object with these exact bytes.
    #[error("object {0} is already stored for this owner")]
    FileAlreadyExists(String),

    #[error("no stored object with hash {0}")]
    FileNotFound(String),

    #[error("object storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad identifier: {0}")]
    Uuid(#[from] hms_uuid::UuidError),
}
