//! Owner-scoped object storage implementation
//!
//! [`FilesService`] stores and retrieves immutable binary objects for a single owner.
//!
//! # Content Addressing
//!
//! Objects are stored under their SHA-256 hash, which gives:
//!
//! - **Integrity**: content can be verified against its hash
//! - **Immutability**: objects are never modified after creation
//! - **Deterministic paths**: the same content always lands at the same path
//!
//! # Security Model
//!
//! - The root is canonicalised at construction time
//! - Hashes are validated as 64 lowercase hex characters before use in a path
//! - Original filenames are metadata only and never used to build paths

use crate::constants::{HASH_ALGORITHM, MAX_FILENAME_LEN};
use crate::{FilesError, FILES_FOLDER_NAME};
use chrono::{DateTime, Utc};
use hms_types::NonEmptyText;
use hms_uuid::{DocumentId, Sha256Hash};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata for a stored object
///
/// Stored alongside the owning document so the object can be located and
/// served later. Holds no owner identifiers itself.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    /// Hashing algorithm used (always "sha256")
    pub hash_algorithm: NonEmptyText,

    /// Hexadecimal digest of the content
    pub hash: Sha256Hash,

    /// Path relative to the owner's storage root
    pub relative_path: NonEmptyText,

    /// Size of the content in bytes
    pub size_bytes: u64,

    /// Detected media type (MIME type), if available
    ///
    /// Best-effort detection from magic bytes; `None` when unknown.
    pub media_type: Option<NonEmptyText>,

    /// Original filename supplied by the uploader (final path component only)
    pub original_filename: NonEmptyText,

    /// UTC timestamp when the object was stored
    pub stored_at: DateTime<Utc>,
}

/// Service for managing the objects of one owner
#[derive(Debug)]
pub struct FilesService {
    /// Root directory containing all owners
    root_directory: PathBuf,

    /// Owner identifier
    owner_id: DocumentId,
}

impl FilesService {
    /// Creates a new `FilesService` for a specific owner
    ///
    /// The owner's storage area is created lazily on first write.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if the root does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(root_directory: &Path, owner_id: DocumentId) -> Result<Self, FilesError> {
        if !root_directory.exists() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Directory does not exist: {}",
                root_directory.display()
            )));
        }

        if !root_directory.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root_directory.display()
            )));
        }

        let root_directory = root_directory.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        Ok(Self {
            root_directory,
            owner_id,
        })
    }

    /// Adds an object to the owner's content-addressed storage
    ///
    /// # Errors
    ///
    /// Returns `FilesError` if:
    /// - the filename is empty or too long
    /// - the same content is already stored for this owner
    /// - directory creation or the write fails
    pub fn add_bytes(
        &self,
        original_filename: &str,
        content: &[u8],
    ) -> Result<FileMetadata, FilesError> {
        let original_filename = sanitise_filename(original_filename)?;

        let mut hasher = Sha256::new();
        hasher.update(content);
        let hash_array: [u8; 32] = hasher.finalize().into();
        let hash = Sha256Hash::from_bytes(&hash_array);

        let storage_path = self.compute_storage_path(&hash);
        if storage_path.exists() {
            return Err(FilesError::FileAlreadyExists(hash.to_string()));
        }

        if let Some(parent) = storage_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FilesError::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create storage directory {}: {}",
                        parent.display(),
                        e
                    ),
                ))
            })?;
        }

        // Write to a sibling temp file first so a crash never leaves a truncated object
        // under its final hash.
        let tmp_path = storage_path.with_extension("partial");
        fs::write(&tmp_path, content).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write file to {}: {}", tmp_path.display(), e),
            ))
        })?;
        fs::rename(&tmp_path, &storage_path)?;

        let media_type = infer::get(content).and_then(|kind| NonEmptyText::new(kind.mime_type()).ok());

        Ok(FileMetadata {
            hash_algorithm: NonEmptyText::new(HASH_ALGORITHM)
                .map_err(|e| FilesError::InvalidPath(e.to_string()))?,
            relative_path: self.compute_relative_path(&hash)?,
            hash,
            size_bytes: content.len() as u64,
            media_type,
            original_filename,
            stored_at: Utc::now(),
        })
    }

    /// Reads an object by its hash
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidPath` for a malformed hash, `FilesError::FileNotFound`
    /// when nothing is stored under it, or `FilesError::Io` if the read fails.
    pub fn read(&self, hash: &str) -> Result<Vec<u8>, FilesError> {
        let hash = Sha256Hash::parse(hash).map_err(|e| FilesError::InvalidPath(e.to_string()))?;
        let storage_path = self.compute_storage_path(&hash);

        if !storage_path.is_file() {
            return Err(FilesError::FileNotFound(hash.to_string()));
        }

        fs::read(&storage_path).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read file from {}: {}", storage_path.display(), e),
            ))
        })
    }

    /// Removes a single object.
    ///
    /// Returns `Ok(false)` if nothing was stored under the hash.
    pub fn remove(&self, hash: &str) -> Result<bool, FilesError> {
        let hash = Sha256Hash::parse(hash).map_err(|e| FilesError::InvalidPath(e.to_string()))?;
        let storage_path = self.compute_storage_path(&hash);

        match fs::remove_file(&storage_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FilesError::Io(e)),
        }
    }

    /// Removes the owner's whole storage area. Missing areas are not an error.
    pub fn remove_all(&self) -> Result<(), FilesError> {
        let owner_root = self.owner_root();
        match fs::remove_dir_all(&owner_root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FilesError::Io(e)),
        }
    }

    /// Returns the owner identifier
    #[must_use]
    pub fn owner_id(&self) -> &DocumentId {
        &self.owner_id
    }

    /// `<owner_root>/files/sha256/<s1>/<s2>/<hash>`
    fn compute_storage_path(&self, hash: &Sha256Hash) -> PathBuf {
        let hash_hex = hash.as_str();
        self.owner_root()
            .join(FILES_FOLDER_NAME)
            .join(HASH_ALGORITHM)
            .join(&hash_hex[0..2])
            .join(&hash_hex[2..4])
            .join(hash_hex)
    }

    fn compute_relative_path(&self, hash: &Sha256Hash) -> Result<NonEmptyText, FilesError> {
        let hash_hex = hash.as_str();
        NonEmptyText::new(format!(
            "{}/{}/{}/{}/{}",
            FILES_FOLDER_NAME,
            HASH_ALGORITHM,
            &hash_hex[0..2],
            &hash_hex[2..4],
            hash_hex
        ))
        .map_err(|e| FilesError::InvalidPath(e.to_string()))
    }

    #[must_use]
    fn owner_root(&self) -> PathBuf {
        self.owner_id.sharded_dir(&self.root_directory)
    }
}

/// Keeps only the final path component and bounds its length.
fn sanitise_filename(input: &str) -> Result<NonEmptyText, FilesError> {
    let last = input
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if last.is_empty() || last == "." || last == ".." {
        return Err(FilesError::InvalidPath(format!(
            "invalid filename: '{}'",
            input
        )));
    }

    let truncated: String = last.chars().take(MAX_FILENAME_LEN).collect();
    NonEmptyText::new(truncated).map_err(|e| FilesError::InvalidPath(e.to_string()))
}
