//! Prescriptions, dispensing and conversion to invoices.

use super::PageRes;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::state::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, patch, post};
use axum::Router;
use hms_core::repositories::billing::Invoice;
use hms_core::repositories::prescriptions::{
    NewPrescription, Prescription, PrescriptionQuery, PrescriptionStatus, PrescriptionUpdate,
};
use hms_core::store::{Page, Stored};
use hms_core::{DocumentId, Permission};
use serde::Deserialize;
use utoipa::ToSchema;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/prescriptions",
            get(list_prescriptions).post(create_prescription),
        )
        .route(
            "/prescriptions/:id",
            get(get_prescription)
                .put(update_prescription)
                .delete(delete_prescription),
        )
        .route("/prescriptions/:id/status", patch(set_prescription_status))
        .route("/prescriptions/:id/dispense", post(dispense_prescription))
        .route("/prescriptions/:id/invoice", post(invoice_prescription))
}

/// Only `active` and `cancelled` can be requested; `dispensed` comes from dispensing.
#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct PrescriptionStatusReq {
    pub status: PrescriptionStatus,
}

#[utoipa::path(
    get,
    path = "/prescriptions",
    tag = "prescriptions",
    params(PrescriptionQuery),
    responses((status = 200, description = "Page of prescriptions", body = PageRes))
)]
#[axum::debug_handler]
pub async fn list_prescriptions(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<PrescriptionQuery>,
) -> ApiResult<Json<Page<Prescription>>> {
    user.require(Permission::PrescriptionsRead)?;
    Ok(Json(state.hms.prescriptions().list(query).await?))
}

#[utoipa::path(
    get,
    path = "/prescriptions/{id}",
    tag = "prescriptions",
    params(("id" = String, Path, description = "Prescription id")),
    responses(
        (status = 200, description = "The prescription", body = Prescription),
        (status = 404, description = "No such prescription", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_prescription(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<Json<Stored<Prescription>>> {
    user.require(Permission::PrescriptionsRead)?;
    Ok(Json(state.hms.prescriptions().get(&id).await?))
}

#[utoipa::path(
    post,
    path = "/prescriptions",
    tag = "prescriptions",
    request_body = NewPrescription,
    responses(
        (status = 201, description = "Draft prescription created", body = Prescription),
        (status = 400, description = "Unknown patient, appointment or medication", body = ErrorRes)
    )
)]
/// The caller becomes the prescriber.
#[axum::debug_handler]
pub async fn create_prescription(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewPrescription>,
) -> ApiResult<(StatusCode, Json<Stored<Prescription>>)> {
    user.require(Permission::PrescriptionsWrite)?;
    let created = state
        .hms
        .prescriptions()
        .create(req, user.user_id())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/prescriptions/{id}",
    tag = "prescriptions",
    params(("id" = String, Path, description = "Prescription id")),
    request_body = PrescriptionUpdate,
    responses(
        (status = 200, description = "Prescription updated", body = Prescription),
        (status = 409, description = "No longer a draft", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn update_prescription(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<PrescriptionUpdate>,
) -> ApiResult<Json<Stored<Prescription>>> {
    user.require(Permission::PrescriptionsWrite)?;
    Ok(Json(state.hms.prescriptions().update(&id, req).await?))
}

#[utoipa::path(
    patch,
    path = "/prescriptions/{id}/status",
    tag = "prescriptions",
    params(("id" = String, Path, description = "Prescription id")),
    request_body = PrescriptionStatusReq,
    responses(
        (status = 200, description = "Status changed", body = Prescription),
        (status = 400, description = "Illegal transition or derived status", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn set_prescription_status(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<PrescriptionStatusReq>,
) -> ApiResult<Json<Stored<Prescription>>> {
    user.require(Permission::PrescriptionsWrite)?;
    Ok(Json(
        state.hms.prescriptions().set_status(&id, req.status).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/prescriptions/{id}",
    tag = "prescriptions",
    params(("id" = String, Path, description = "Prescription id")),
    responses(
        (status = 204, description = "Prescription deleted"),
        (status = 409, description = "Only drafts and cancelled prescriptions can be deleted", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn delete_prescription(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<StatusCode> {
    user.require(Permission::PrescriptionsWrite)?;
    state.hms.prescriptions().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/prescriptions/{id}/dispense",
    tag = "prescriptions",
    params(("id" = String, Path, description = "Prescription id")),
    responses(
        (status = 200, description = "Dispensed; stock was taken for every item", body = Prescription),
        (status = 400, description = "Not active, or insufficient stock for an item; nothing was taken", body = ErrorRes)
    )
)]
/// Takes stock for every item, or for none of them.
#[axum::debug_handler]
pub async fn dispense_prescription(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<Json<Stored<Prescription>>> {
    user.require(Permission::PrescriptionsWrite)?;
    user.require(Permission::InventoryWrite)?;
    Ok(Json(
        state
            .hms
            .prescriptions()
            .dispense(&id, user.user_id())
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/prescriptions/{id}/invoice",
    tag = "prescriptions",
    params(("id" = String, Path, description = "Prescription id")),
    responses(
        (status = 201, description = "Issued invoice priced from current medication prices", body = Invoice),
        (status = 409, description = "Not active or dispensed, or already invoiced", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn invoice_prescription(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<(StatusCode, Json<Stored<Invoice>>)> {
    user.require(Permission::BillingWrite)?;
    let invoice = state.hms.prescriptions().convert_to_invoice(&id).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}
