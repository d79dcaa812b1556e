//! Constants used throughout the HMS core crate.
//!
//! Collection names double as directory names for the file store and URL segments for the
//! remote store, so they must satisfy [`crate::store::validate_collection`].

pub const PATIENTS: &str = "patients";
pub const PATIENT_FILES: &str = "patient_files";
pub const APPOINTMENTS: &str = "appointments";
pub const PRESCRIPTIONS: &str = "prescriptions";
pub const INVOICES: &str = "invoices";
pub const PAYMENTS: &str = "payments";
pub const MEDICATIONS: &str = "medications";
pub const STOCK_MOVEMENTS: &str = "stock_movements";
pub const USERS: &str = "users";
pub const USER_EMAILS: &str = "user_emails";
pub const CREDENTIALS: &str = "credentials";
pub const ROLES: &str = "roles";
pub const CUSTOM_FIELDS: &str = "custom_fields";
pub const SESSIONS: &str = "sessions";

/// Scopes for [`hms_uuid::DocumentId::derived`].
pub const EMAIL_ID_SCOPE: &str = "user-email";
pub const INVOICE_FOR_PRESCRIPTION_SCOPE: &str = "prescription-invoice";
pub const CUSTOM_FIELD_ID_SCOPE: &str = "custom-field";

/// Default directory for document data when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "hms_data";

/// Object storage directory name under the data directory.
pub const DEFAULT_FILES_DIR_NAME: &str = "objects";

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 12;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// OWASP 2023 recommendation for PBKDF2-HMAC-SHA256.
pub const DEFAULT_PASSWORD_ITERATIONS: u32 = 600_000;
pub const MIN_PASSWORD_LEN: usize = 8;

/// Listing page size when the caller gives none, and the hard cap.
pub const DEFAULT_PAGE_LIMIT: usize = 25;
pub const MAX_PAGE_LIMIT: usize = 200;

/// How many times a read-modify-write retries after losing a revision race.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

pub const ADMIN_ROLE_NAME: &str = "Administrator";
