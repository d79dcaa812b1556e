use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum HmsError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} already exists: {detail}")]
    AlreadyExists {
        entity: &'static str,
        detail: String,
    },
    /// A domain rule forbids the operation in the current state (e.g. deleting a patient
    /// that still has invoices), or a write kept losing the revision race.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid status transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("insufficient stock for {medication}: available {available}, requested {requested}")]
    InsufficientStock {
        medication: String,
        available: i64,
        requested: i64,
    },
    #[error("authentication required")]
    Unauthorized,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("missing permission: {0}")]
    Forbidden(String),
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("failed to hash password: {0}")]
    PasswordHash(String),
    #[error("background task failed: {0}")]
    Task(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("object storage error: {0}")]
    Files(#[from] hms_files::FilesError),
    #[error("failed to decode {entity} document {id}: {source}")]
    Decode {
        entity: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize document: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid identifier: {0}")]
    Uuid(#[from] hms_uuid::UuidError),
    #[error("invalid text: {0}")]
    Text(#[from] hms_types::TextError),
}

impl HmsError {
    pub fn invalid(message: impl Into<String>) -> Self {
        HmsError::InvalidInput(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        HmsError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type HmsResult<T> = std::result::Result<T, HmsError>;
