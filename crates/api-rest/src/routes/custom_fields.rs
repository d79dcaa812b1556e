//! Custom field definitions. Readable by any logged-in user, writable with
//! `settings.manage`.

use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::state::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, put};
use axum::Router;
use hms_core::repositories::custom_fields::{
    CustomField, CustomFieldQuery, CustomFieldUpdate, NewCustomField,
};
use hms_core::store::Stored;
use hms_core::{DocumentId, Permission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/custom-fields", get(list_fields).post(create_field))
        .route("/custom-fields/:id", put(update_field).delete(delete_field))
}

#[utoipa::path(
    get,
    path = "/custom-fields",
    tag = "custom-fields",
    params(CustomFieldQuery),
    responses((status = 200, description = "Definitions, oldest first", body = [CustomField]))
)]
#[axum::debug_handler]
pub async fn list_fields(
    State(state): State<AppState>,
    _user: CurrentUser,
    ApiQuery(query): ApiQuery<CustomFieldQuery>,
) -> ApiResult<Json<Vec<Stored<CustomField>>>> {
    Ok(Json(state.hms.custom_fields().list(query).await?))
}

#[utoipa::path(
    post,
    path = "/custom-fields",
    tag = "custom-fields",
    request_body = NewCustomField,
    responses(
        (status = 201, description = "Definition created", body = CustomField),
        (status = 400, description = "Invalid key, type or options", body = ErrorRes),
        (status = 409, description = "Key already defined for the entity", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_field(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewCustomField>,
) -> ApiResult<(StatusCode, Json<Stored<CustomField>>)> {
    user.require(Permission::SettingsManage)?;
    let created = state.hms.custom_fields().create(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/custom-fields/{id}",
    tag = "custom-fields",
    params(("id" = String, Path, description = "Definition id")),
    request_body = CustomFieldUpdate,
    responses(
        (status = 200, description = "Definition updated", body = CustomField),
        (status = 404, description = "No such definition", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn update_field(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<CustomFieldUpdate>,
) -> ApiResult<Json<Stored<CustomField>>> {
    user.require(Permission::SettingsManage)?;
    Ok(Json(state.hms.custom_fields().update(&id, req).await?))
}

#[utoipa::path(
    delete,
    path = "/custom-fields/{id}",
    tag = "custom-fields",
    params(("id" = String, Path, description = "Definition id")),
    responses(
        (status = 204, description = "Definition deleted"),
        (status = 404, description = "No such definition", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn delete_field(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<StatusCode> {
    user.require(Permission::SettingsManage)?;
    state.hms.custom_fields().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
