//! # API Shared
//!
//! Shared utilities and definitions for HMS APIs.
//!
//! Contains:
//! - Wire types every surface returns: health and error bodies, login request
//! - Shared services like `HealthService`
//! - Session-token helpers (cookie and bearer header handling)
//!
//! Used by `api-rest` and the main binary.

pub mod auth;
pub mod health;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use auth::{clear_session_cookie, session_cookie, session_token, LoginReq, SESSION_COOKIE};
pub use health::HealthService;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Body of every error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    /// Stable machine-readable code, e.g. `not_found`.
    pub error: String,
    /// Human-readable explanation.
    pub message: String,
}

impl ErrorRes {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
