use super::PageRes;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::state::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use hms_core::repositories::roles::{NewRole, Role, RoleUpdate};
use hms_core::store::{Page, PageParams, Stored};
use hms_core::{DocumentId, Permission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route(
            "/roles/:id",
            get(get_role).put(update_role).delete(delete_role),
        )
}

#[utoipa::path(
    get,
    path = "/roles",
    tag = "roles",
    params(
        ("limit" = Option<usize>, Query, description = "Page size (1-200, default 25)"),
        ("offset" = Option<usize>, Query, description = "Items to skip")
    ),
    responses((status = 200, description = "Page of roles", body = PageRes))
)]
#[axum::debug_handler]
pub async fn list_roles(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(page): ApiQuery<PageParams>,
) -> ApiResult<Json<Page<Role>>> {
    user.require(Permission::UsersManage)?;
    Ok(Json(state.hms.roles().list(page).await?))
}

#[utoipa::path(
    get,
    path = "/roles/{id}",
    tag = "roles",
    params(("id" = String, Path, description = "Role id")),
    responses(
        (status = 200, description = "The role", body = Role),
        (status = 404, description = "No such role", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_role(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<Json<Stored<Role>>> {
    user.require(Permission::UsersManage)?;
    Ok(Json(state.hms.roles().get(&id).await?))
}

#[utoipa::path(
    post,
    path = "/roles",
    tag = "roles",
    request_body = NewRole,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Invalid input", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_role(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewRole>,
) -> ApiResult<(StatusCode, Json<Stored<Role>>)> {
    user.require(Permission::UsersManage)?;
    let created = state.hms.roles().create(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/roles/{id}",
    tag = "roles",
    params(("id" = String, Path, description = "Role id")),
    request_body = RoleUpdate,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 404, description = "No such role", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn update_role(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<RoleUpdate>,
) -> ApiResult<Json<Stored<Role>>> {
    user.require(Permission::UsersManage)?;
    Ok(Json(state.hms.roles().update(&id, req).await?))
}

#[utoipa::path(
    delete,
    path = "/roles/{id}",
    tag = "roles",
    params(("id" = String, Path, description = "Role id")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 409, description = "Role still assigned to a user", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn delete_role(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<StatusCode> {
    user.require(Permission::UsersManage)?;
    state.hms.roles().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
