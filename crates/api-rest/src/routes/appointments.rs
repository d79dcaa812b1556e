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
use hms_core::repositories::appointments::{
    Appointment, AppointmentQuery, AppointmentStatus, AppointmentUpdate, NewAppointment,
};
use hms_core::store::{Page, Stored};
use hms_core::{DocumentId, Permission};
use serde::Deserialize;
use utoipa::ToSchema;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route(
            "/appointments/:id",
            get(get_appointment)
                .put(update_appointment)
                .delete(delete_appointment),
        )
        .route("/appointments/:id/status", patch(set_appointment_status))
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct AppointmentStatusReq {
    pub status: AppointmentStatus,
}

#[utoipa::path(
    get,
    path = "/appointments",
    tag = "appointments",
    params(AppointmentQuery),
    responses((status = 200, description = "Page of appointments", body = PageRes))
)]
#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<AppointmentQuery>,
) -> ApiResult<Json<Page<Appointment>>> {
    user.require(Permission::AppointmentsRead)?;
    Ok(Json(state.hms.appointments().list(query).await?))
}

#[utoipa::path(
    get,
    path = "/appointments/{id}",
    tag = "appointments",
    params(("id" = String, Path, description = "Appointment id")),
    responses(
        (status = 200, description = "The appointment", body = Appointment),
        (status = 404, description = "No such appointment", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<Json<Stored<Appointment>>> {
    user.require(Permission::AppointmentsRead)?;
    Ok(Json(state.hms.appointments().get(&id).await?))
}

#[utoipa::path(
    post,
    path = "/appointments",
    tag = "appointments",
    request_body = NewAppointment,
    responses(
        (status = 201, description = "Appointment scheduled", body = Appointment),
        (status = 400, description = "Invalid input, unknown patient or doctor", body = ErrorRes),
        (status = 409, description = "The doctor is already booked in that slot", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewAppointment>,
) -> ApiResult<(StatusCode, Json<Stored<Appointment>>)> {
    user.require(Permission::AppointmentsWrite)?;
    let created = state.hms.appointments().create(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/appointments/{id}",
    tag = "appointments",
    params(("id" = String, Path, description = "Appointment id")),
    request_body = AppointmentUpdate,
    responses(
        (status = 200, description = "Appointment updated", body = Appointment),
        (status = 409, description = "No longer scheduled, or the new slot is taken", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<AppointmentUpdate>,
) -> ApiResult<Json<Stored<Appointment>>> {
    user.require(Permission::AppointmentsWrite)?;
    Ok(Json(state.hms.appointments().update(&id, req).await?))
}

#[utoipa::path(
    patch,
    path = "/appointments/{id}/status",
    tag = "appointments",
    params(("id" = String, Path, description = "Appointment id")),
    request_body = AppointmentStatusReq,
    responses(
        (status = 200, description = "Status changed", body = Appointment),
        (status = 400, description = "Illegal transition", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn set_appointment_status(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<AppointmentStatusReq>,
) -> ApiResult<Json<Stored<Appointment>>> {
    user.require(Permission::AppointmentsWrite)?;
    Ok(Json(
        state.hms.appointments().set_status(&id, req.status).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/appointments/{id}",
    tag = "appointments",
    params(("id" = String, Path, description = "Appointment id")),
    responses(
        (status = 204, description = "Appointment deleted"),
        (status = 404, description = "No such appointment", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn delete_appointment(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<StatusCode> {
    user.require(Permission::AppointmentsWrite)?;
    state.hms.appointments().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
