//! Request extractors.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::request::Parts;
use hms_core::{AuthContext, HmsError};

/// The authenticated caller. Rejects with 401 when the session token is missing, unknown
/// or expired.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthContext);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = api_shared::session_token(&parts.headers).ok_or(HmsError::Unauthorized)?;
        let ctx = state.hms.auth().authenticate(&token).await?;
        Ok(CurrentUser(ctx))
    }
}

impl std::ops::Deref for CurrentUser {
    type Target = AuthContext;

    fn deref(&self) -> &AuthContext {
        &self.0
    }
}

/// `Json` whose rejections render as [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Path` whose rejections render as [`ApiError`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// `Query` whose rejections render as [`ApiError`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);
