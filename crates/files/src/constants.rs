/// Directory under each owner's storage root that holds binary objects.
pub const FILES_FOLDER_NAME: &str = "files";

/// Hash algorithm label recorded in [`crate::FileMetadata`].
pub const HASH_ALGORITHM: &str = "sha256";

/// Longest original filename kept in metadata.
pub const MAX_FILENAME_LEN: usize = 255;
