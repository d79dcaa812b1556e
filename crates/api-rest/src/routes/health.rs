use crate::state::AppState;
use api_shared::{HealthRes, HealthService};
use axum::response::Json;
use axum::routing::get;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Used by monitoring and load balancer health checks; needs no session.
#[axum::debug_handler(state = AppState)]
pub async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}
