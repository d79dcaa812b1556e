//! Staff accounts (`users.manage`).

use super::PageRes;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::state::AppState;
use api_shared::ErrorRes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, put};
use axum::Router;
use hms_core::repositories::users::{NewUser, User, UserQuery, UserUpdate};
use hms_core::store::{Page, Stored};
use hms_core::{DocumentId, Permission};
use serde::Deserialize;
use utoipa::ToSchema;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/users/:id/password", put(set_password))
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct PasswordReq {
    pub password: String,
}

#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    params(UserQuery),
    responses(
        (status = 200, description = "Page of users", body = PageRes),
        (status = 403, description = "Missing users.manage", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<UserQuery>,
) -> ApiResult<Json<Page<User>>> {
    user.require(Permission::UsersManage)?;
    Ok(Json(state.hms.users().list(query).await?))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "The user", body = User),
        (status = 404, description = "No such user", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_user(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<Json<Stored<User>>> {
    user.require(Permission::UsersManage)?;
    Ok(Json(state.hms.users().get(&id).await?))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Invalid input or unknown role", body = ErrorRes),
        (status = 409, description = "E-mail already in use", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_user(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewUser>,
) -> ApiResult<(StatusCode, Json<Stored<User>>)> {
    user.require(Permission::UsersManage)?;
    let created = state.hms.users().create(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "users",
    params(("id" = String, Path, description = "User id")),
    request_body = UserUpdate,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 404, description = "No such user", body = ErrorRes),
        (status = 409, description = "E-mail already in use", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn update_user(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<UserUpdate>,
) -> ApiResult<Json<Stored<User>>> {
    user.require(Permission::UsersManage)?;
    Ok(Json(state.hms.users().update(&id, req).await?))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Users cannot delete themselves", body = ErrorRes),
        (status = 404, description = "No such user", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn delete_user(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<StatusCode> {
    user.require(Permission::UsersManage)?;
    state.hms.users().delete(&user.user_id(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/users/{id}/password",
    tag = "users",
    params(("id" = String, Path, description = "User id")),
    request_body = PasswordReq,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Password too short", body = ErrorRes),
        (status = 403, description = "Neither the user nor a user manager", body = ErrorRes)
    )
)]
/// Changes a password. Users may change their own; anyone else needs `users.manage`.
#[axum::debug_handler]
pub async fn set_password(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<PasswordReq>,
) -> ApiResult<StatusCode> {
    if user.user_id() != id {
        user.require(Permission::UsersManage)?;
    }
    state.hms.users().set_password(&id, req.password).await?;
    Ok(StatusCode::NO_CONTENT)
}
