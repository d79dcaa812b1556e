//! Route handlers, one module per resource.
//!
//! Every handler except `health` and `login` takes a [`CurrentUser`](crate::extract::CurrentUser)
//! and checks the permission its operation needs before touching the store.

pub mod appointments;
pub mod auth;
pub mod custom_fields;
pub mod health;
pub mod invoices;
pub mod medications;
pub mod patients;
pub mod prescriptions;
pub mod roles;
pub mod users;

use crate::state::AppState;
use axum::Router;
use serde::Serialize;
use utoipa::ToSchema;

/// Routes of the whole API, without documentation or middleware.
pub fn api_router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(users::router())
        .merge(roles::router())
        .merge(custom_fields::router())
        .merge(patients::router(max_upload_bytes))
        .merge(appointments::router())
        .merge(medications::router())
        .merge(prescriptions::router())
        .merge(invoices::router())
}

/// Envelope of every list response.
///
/// Documented separately because the items carry their own schema.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PageRes {
    /// Number of matches across all pages.
    pub total: usize,
    pub items: Vec<serde_json::Value>,
}
