//! Login, logout and the current session.

use crate::error::ApiResult;
use crate::extract::{ApiJson, CurrentUser};
use crate::state::AppState;
use api_shared::{clear_session_cookie, session_cookie, session_token, ErrorRes, LoginReq};
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use hms_core::repositories::users::User;
use hms_core::store::Stored;
use hms_core::Permission;
use serde::Serialize;
use std::collections::BTreeSet;
use utoipa::ToSchema;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginRes {
    /// Also set as the `hms_session` cookie.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[schema(value_type = User)]
    pub user: Stored<User>,
    pub permissions: BTreeSet<Permission>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeRes {
    #[schema(value_type = User)]
    pub user: Stored<User>,
    pub permissions: BTreeSet<Permission>,
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginReq,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = LoginRes),
        (status = 401, description = "Unknown e-mail, wrong password or inactive user", body = ErrorRes)
    )
)]
/// Exchanges credentials for a session.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginReq>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.hms.auth().login(&req.email, &req.password).await?;
    let cfg = state.hms.cfg();
    let cookie = session_cookie(
        &outcome.token,
        cfg.session_ttl().num_seconds(),
        cfg.cookie_secure(),
    );

    Ok((
        [(SET_COOKIE, cookie)],
        Json(LoginRes {
            token: outcome.token,
            expires_at: outcome.expires_at,
            user: outcome.user,
            permissions: outcome.permissions,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    responses(
        (status = 204, description = "Session ended and cookie cleared"),
        (status = 401, description = "Not logged in", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    _user: CurrentUser,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    if let Some(token) = session_token(&headers) {
        state.hms.auth().logout(&token).await?;
    }
    let cookie = clear_session_cookie(state.hms.cfg().cookie_secure());
    Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "The logged-in user and their effective permissions", body = MeRes),
        (status = 401, description = "Not logged in", body = ErrorRes)
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn me(CurrentUser(ctx): CurrentUser) -> Json<MeRes> {
    Json(MeRes {
        user: ctx.user,
        permissions: ctx.permissions,
    })
}
