//! Mapping of domain errors to HTTP responses.

use api_shared::ErrorRes;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hms_core::HmsError;

/// Error returned by every handler. Renders as [`ErrorRes`].
#[derive(Debug)]
pub enum ApiError {
    Core(HmsError),
    /// The request could not be parsed (bad JSON, path or query string).
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<HmsError> for ApiError {
    fn from(e: HmsError) -> Self {
        ApiError::Core(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn classify(e: &HmsError) -> (StatusCode, &'static str) {
    use hms_core::store::StoreError;
    use hms_core::FilesError;

    match e {
        HmsError::InvalidInput(_)
        | HmsError::Overflow(_)
        | HmsError::Text(_)
        | HmsError::Uuid(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        HmsError::InvalidTransition { .. } => (StatusCode::BAD_REQUEST, "invalid_transition"),
        HmsError::InsufficientStock { .. } => (StatusCode::BAD_REQUEST, "insufficient_stock"),
        HmsError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        HmsError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
        HmsError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
        HmsError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        HmsError::AlreadyExists { .. } => (StatusCode::CONFLICT, "already_exists"),
        HmsError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        HmsError::Files(FilesError::FileAlreadyExists(_)) => {
            (StatusCode::CONFLICT, "already_exists")
        }
        HmsError::Files(FilesError::FileNotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
        HmsError::Files(FilesError::InvalidPath(_)) => (StatusCode::BAD_REQUEST, "invalid_input"),
        HmsError::Store(StoreError::InvalidQuery(_)) => {
            (StatusCode::BAD_REQUEST, "invalid_input")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorRes::new("invalid_input", message),
            ),
            ApiError::Core(e) => {
                let (status, code) = classify(&e);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("request failed: {:?}", e);
                    (status, ErrorRes::new(code, "Internal error"))
                } else {
                    (status, ErrorRes::new(code, e.to_string()))
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: HmsError) -> StatusCode {
        ApiError::from(e).into_response().status()
    }

    #[test]
    fn domain_errors_map_to_statuses() {
        assert_eq!(status_of(HmsError::invalid("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(HmsError::InsufficientStock {
                medication: "m".into(),
                available: 1,
                requested: 2
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(HmsError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(HmsError::Forbidden("p".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_of(HmsError::not_found("patient", "1")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(HmsError::Conflict("c".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(HmsError::Overflow("stock quantity")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(classify(&HmsError::Overflow("amount")).1, "invalid_input");
        assert_eq!(
            status_of(HmsError::Task("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
