//! # API REST
//!
//! REST API for the HMS hospital administration system.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON bodies, session cookies, CORS, status codes)
//!
//! Business rules and permission checks live in `hms-core`; handlers here only translate
//! between HTTP and the core services.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod extract;
pub mod openapi;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// The complete application: API routes, Swagger UI and middleware, bound to `state`.
pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.hms.cfg().max_upload_bytes();
    Router::new()
        .merge(routes::api_router(max_upload_bytes))
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
