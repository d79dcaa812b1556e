//! Medication inventory and the stock ledger.

use super::PageRes;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::state::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use hms_core::repositories::inventory::{
    Medication, MedicationQuery, MedicationUpdate, NewMedication, StockAdjustment, StockMovement,
};
use hms_core::store::{Page, PageParams, Stored};
use hms_core::{DocumentId, Permission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/medications", get(list_medications).post(create_medication))
        .route(
            "/medications/:id",
            get(get_medication)
                .put(update_medication)
                .delete(delete_medication),
        )
        .route("/medications/:id/stock", post(adjust_stock))
        .route("/medications/:id/movements", get(list_movements))
}

#[utoipa::path(
    get,
    path = "/medications",
    tag = "inventory",
    params(MedicationQuery),
    responses((status = 200, description = "Page of medications", body = PageRes))
)]
#[axum::debug_handler]
pub async fn list_medications(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<MedicationQuery>,
) -> ApiResult<Json<Page<Medication>>> {
    user.require(Permission::InventoryRead)?;
    Ok(Json(state.hms.inventory().list(query).await?))
}

#[utoipa::path(
    get,
    path = "/medications/{id}",
    tag = "inventory",
    params(("id" = String, Path, description = "Medication id")),
    responses(
        (status = 200, description = "The medication", body = Medication),
        (status = 404, description = "No such medication", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_medication(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<Json<Stored<Medication>>> {
    user.require(Permission::InventoryRead)?;
    Ok(Json(state.hms.inventory().get(&id).await?))
}

#[utoipa::path(
    post,
    path = "/medications",
    tag = "inventory",
    request_body = NewMedication,
    responses(
        (status = 201, description = "Medication created", body = Medication),
        (status = 400, description = "Invalid input", body = ErrorRes)
    )
)]
/// Creates a medication. Opening stock is recorded in the ledger as an `initial` movement.
#[axum::debug_handler]
pub async fn create_medication(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewMedication>,
) -> ApiResult<(StatusCode, Json<Stored<Medication>>)> {
    user.require(Permission::InventoryWrite)?;
    let created = state
        .hms
        .inventory()
        .create(req, Some(user.user_id()))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/medications/{id}",
    tag = "inventory",
    params(("id" = String, Path, description = "Medication id")),
    request_body = MedicationUpdate,
    responses(
        (status = 200, description = "Medication updated", body = Medication),
        (status = 400, description = "Invalid input, including any attempt to set stock", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn update_medication(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<MedicationUpdate>,
) -> ApiResult<Json<Stored<Medication>>> {
    user.require(Permission::InventoryWrite)?;
    Ok(Json(state.hms.inventory().update(&id, req).await?))
}

#[utoipa::path(
    delete,
    path = "/medications/{id}",
    tag = "inventory",
    params(("id" = String, Path, description = "Medication id")),
    responses(
        (status = 204, description = "Medication deleted"),
        (status = 409, description = "Stock remaining", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn delete_medication(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<StatusCode> {
    user.require(Permission::InventoryWrite)?;
    state.hms.inventory().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/medications/{id}/stock",
    tag = "inventory",
    params(("id" = String, Path, description = "Medication id")),
    request_body = StockAdjustment,
    responses(
        (status = 201, description = "Stock adjusted; the recorded movement", body = StockMovement),
        (status = 400, description = "Zero delta, sign/reason mismatch or insufficient stock", body = ErrorRes),
        (status = 409, description = "Concurrent modification, retries exhausted", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn adjust_stock(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<StockAdjustment>,
) -> ApiResult<(StatusCode, Json<Stored<StockMovement>>)> {
    user.require(Permission::InventoryWrite)?;
    let movement = state
        .hms
        .inventory()
        .adjust_stock(&id, req, Some(user.user_id()), None)
        .await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

#[utoipa::path(
    get,
    path = "/medications/{id}/movements",
    tag = "inventory",
    params(
        ("id" = String, Path, description = "Medication id"),
        ("limit" = Option<usize>, Query, description = "Page size (1-200, default 25)"),
        ("offset" = Option<usize>, Query, description = "Items to skip")
    ),
    responses(
        (status = 200, description = "Page of stock movements, newest first", body = PageRes),
        (status = 404, description = "No such medication", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn list_movements(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiQuery(page): ApiQuery<PageParams>,
) -> ApiResult<Json<Page<StockMovement>>> {
    user.require(Permission::InventoryRead)?;
    Ok(Json(state.hms.inventory().list_movements(&id, page).await?))
}
