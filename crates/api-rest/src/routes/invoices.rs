//! Invoices and their payments.

use super::PageRes;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::state::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, patch};
use axum::Router;
use hms_core::repositories::billing::{
    Invoice, InvoiceQuery, InvoiceStatus, InvoiceUpdate, NewInvoice, NewPayment, Payment,
};
use hms_core::store::{Page, Stored};
use hms_core::{DocumentId, Permission};
use serde::Deserialize;
use utoipa::ToSchema;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invoices", get(list_invoices).post(create_invoice))
        .route(
            "/invoices/:id",
            get(get_invoice).put(update_invoice).delete(delete_invoice),
        )
        .route("/invoices/:id/status", patch(set_invoice_status))
        .route(
            "/invoices/:id/payments",
            get(list_payments).post(record_payment),
        )
}

/// `issued` or `cancelled`. The paid states follow from payments.
#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct InvoiceStatusReq {
    pub status: InvoiceStatus,
}

#[utoipa::path(
    get,
    path = "/invoices",
    tag = "billing",
    params(InvoiceQuery),
    responses((status = 200, description = "Page of invoices", body = PageRes))
)]
#[axum::debug_handler]
pub async fn list_invoices(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<InvoiceQuery>,
) -> ApiResult<Json<Page<Invoice>>> {
    user.require(Permission::BillingRead)?;
    Ok(Json(state.hms.billing().list(query).await?))
}

#[utoipa::path(
    get,
    path = "/invoices/{id}",
    tag = "billing",
    params(("id" = String, Path, description = "Invoice id")),
    responses(
        (status = 200, description = "The invoice", body = Invoice),
        (status = 404, description = "No such invoice", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_invoice(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<Json<Stored<Invoice>>> {
    user.require(Permission::BillingRead)?;
    Ok(Json(state.hms.billing().get(&id).await?))
}

#[utoipa::path(
    post,
    path = "/invoices",
    tag = "billing",
    request_body = NewInvoice,
    responses(
        (status = 201, description = "Draft invoice created", body = Invoice),
        (status = 400, description = "Unknown patient or invalid items", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_invoice(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewInvoice>,
) -> ApiResult<(StatusCode, Json<Stored<Invoice>>)> {
    user.require(Permission::BillingWrite)?;
    let created = state.hms.billing().create(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/invoices/{id}",
    tag = "billing",
    params(("id" = String, Path, description = "Invoice id")),
    request_body = InvoiceUpdate,
    responses(
        (status = 200, description = "Invoice updated and repriced", body = Invoice),
        (status = 409, description = "No longer a draft", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn update_invoice(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<InvoiceUpdate>,
) -> ApiResult<Json<Stored<Invoice>>> {
    user.require(Permission::BillingWrite)?;
    Ok(Json(state.hms.billing().update(&id, req).await?))
}

#[utoipa::path(
    patch,
    path = "/invoices/{id}/status",
    tag = "billing",
    params(("id" = String, Path, description = "Invoice id")),
    request_body = InvoiceStatusReq,
    responses(
        (status = 200, description = "Status changed", body = Invoice),
        (status = 400, description = "Illegal transition or derived status", body = ErrorRes),
        (status = 409, description = "Cancelling an invoice that has payments", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn set_invoice_status(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<InvoiceStatusReq>,
) -> ApiResult<Json<Stored<Invoice>>> {
    user.require(Permission::BillingWrite)?;
    Ok(Json(state.hms.billing().set_status(&id, req.status).await?))
}

#[utoipa::path(
    delete,
    path = "/invoices/{id}",
    tag = "billing",
    params(("id" = String, Path, description = "Invoice id")),
    responses(
        (status = 204, description = "Invoice deleted"),
        (status = 409, description = "Only drafts and cancelled invoices can be deleted", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn delete_invoice(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<StatusCode> {
    user.require(Permission::BillingWrite)?;
    state.hms.billing().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/invoices/{id}/payments",
    tag = "billing",
    params(("id" = String, Path, description = "Invoice id")),
    responses(
        (status = 200, description = "Payments, oldest first", body = [Payment]),
        (status = 404, description = "No such invoice", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn list_payments(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<Json<Vec<Stored<Payment>>>> {
    user.require(Permission::BillingRead)?;
    Ok(Json(state.hms.billing().list_payments(&id).await?))
}

#[utoipa::path(
    post,
    path = "/invoices/{id}/payments",
    tag = "billing",
    params(("id" = String, Path, description = "Invoice id")),
    request_body = NewPayment,
    responses(
        (status = 201, description = "Payment recorded; the invoice balance is reduced", body = Payment),
        (status = 400, description = "Amount not positive or above the balance", body = ErrorRes),
        (status = 409, description = "Invoice does not accept payments", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn record_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<NewPayment>,
) -> ApiResult<(StatusCode, Json<Stored<Payment>>)> {
    user.require(Permission::BillingWrite)?;
    let payment = state
        .hms
        .billing()
        .record_payment(&id, req, user.user_id())
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}
