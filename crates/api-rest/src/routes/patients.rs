//! Patient records and attachments.

use super::PageRes;
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::state::AppState;
use api_shared::ErrorRes;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use hms_core::repositories::patients::{
    NewPatient, Patient, PatientFile, PatientQuery, PatientUpdate,
};
use hms_core::store::{Page, Stored};
use hms_core::{DocumentId, Permission};

/// Header carrying the original filename of an upload.
pub const FILE_NAME_HEADER: &str = "x-file-name";

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/patients", get(list_patients).post(create_patient))
        .route(
            "/patients/:id",
            get(get_patient).put(update_patient).delete(delete_patient),
        )
        .route(
            "/patients/:id/files",
            get(list_files)
                .post(upload_file)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/patients/:id/files/:file_id",
            get(download_file).delete(delete_file),
        )
}

#[utoipa::path(
    get,
    path = "/patients",
    tag = "patients",
    params(PatientQuery),
    responses(
        (status = 200, description = "Page of patients", body = PageRes),
        (status = 403, description = "Missing patients.read", body = ErrorRes)
    )
)]
/// Lists patients, optionally filtered by a search term.
#[axum::debug_handler]
pub async fn list_patients(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<PatientQuery>,
) -> ApiResult<Json<Page<Patient>>> {
    user.require(Permission::PatientsRead)?;
    Ok(Json(state.hms.patients().list(query).await?))
}

#[utoipa::path(
    get,
    path = "/patients/{id}",
    tag = "patients",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "The patient", body = Patient),
        (status = 404, description = "No such patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_patient(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<Json<Stored<Patient>>> {
    user.require(Permission::PatientsRead)?;
    Ok(Json(state.hms.patients().get(&id).await?))
}

#[utoipa::path(
    post,
    path = "/patients",
    tag = "patients",
    request_body = NewPatient,
    responses(
        (status = 201, description = "Patient created", body = Patient),
        (status = 400, description = "Invalid input or custom values", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn create_patient(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<NewPatient>,
) -> ApiResult<(StatusCode, Json<Stored<Patient>>)> {
    user.require(Permission::PatientsWrite)?;
    let created = state.hms.patients().create(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    put,
    path = "/patients/{id}",
    tag = "patients",
    params(("id" = String, Path, description = "Patient id")),
    request_body = PatientUpdate,
    responses(
        (status = 200, description = "Patient updated", body = Patient),
        (status = 404, description = "No such patient", body = ErrorRes)
    )
)]
/// Partial update: absent fields are kept.
#[axum::debug_handler]
pub async fn update_patient(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    ApiJson(req): ApiJson<PatientUpdate>,
) -> ApiResult<Json<Stored<Patient>>> {
    user.require(Permission::PatientsWrite)?;
    Ok(Json(state.hms.patients().update(&id, req).await?))
}

#[utoipa::path(
    delete,
    path = "/patients/{id}",
    tag = "patients",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 204, description = "Patient and attachments deleted"),
        (status = 404, description = "No such patient", body = ErrorRes),
        (status = 409, description = "Patient has invoices", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn delete_patient(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<StatusCode> {
    user.require(Permission::PatientsWrite)?;
    state.hms.patients().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/patients/{id}/files",
    tag = "patients",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Attachment metadata, oldest first", body = [PatientFile]),
        (status = 404, description = "No such patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn list_files(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
) -> ApiResult<Json<Vec<Stored<PatientFile>>>> {
    user.require(Permission::PatientsRead)?;
    Ok(Json(state.hms.patients().list_attachments(&id).await?))
}

#[utoipa::path(
    post,
    path = "/patients/{id}/files",
    tag = "patients",
    params(
        ("id" = String, Path, description = "Patient id"),
        ("X-File-Name" = String, Header, description = "Original filename")
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 201, description = "Attachment stored", body = PatientFile),
        (status = 400, description = "Missing filename, empty or oversized body", body = ErrorRes),
        (status = 409, description = "Identical content already attached", body = ErrorRes),
        (status = 413, description = "Body exceeds the upload limit")
    )
)]
/// Stores the raw request body as an attachment.
#[axum::debug_handler]
pub async fn upload_file(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath(id): ApiPath<DocumentId>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Stored<PatientFile>>)> {
    user.require(Permission::PatientsWrite)?;
    let filename = headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing X-File-Name header".into()))?
        .to_string();

    let stored = state
        .hms
        .patients()
        .add_attachment(&id, &filename, body.to_vec(), user.user_id())
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Quotes and non-ASCII would break the header; they are replaced.
fn disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

#[utoipa::path(
    get,
    path = "/patients/{id}/files/{file_id}",
    tag = "patients",
    params(
        ("id" = String, Path, description = "Patient id"),
        ("file_id" = String, Path, description = "Attachment id")
    ),
    responses(
        (status = 200, description = "The attachment bytes with their stored media type"),
        (status = 404, description = "No such attachment", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn download_file(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath((id, file_id)): ApiPath<(DocumentId, DocumentId)>,
) -> ApiResult<impl IntoResponse> {
    user.require(Permission::PatientsRead)?;
    let (file, bytes) = state.hms.patients().read_attachment(&id, &file_id).await?;
    Ok((
        [
            (CONTENT_TYPE, file.data.media_type.clone()),
            (CONTENT_DISPOSITION, disposition(&file.data.filename)),
        ],
        bytes,
    ))
}

#[utoipa::path(
    delete,
    path = "/patients/{id}/files/{file_id}",
    tag = "patients",
    params(
        ("id" = String, Path, description = "Patient id"),
        ("file_id" = String, Path, description = "Attachment id")
    ),
    responses(
        (status = 204, description = "Attachment deleted"),
        (status = 404, description = "No such attachment", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn delete_file(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiPath((id, file_id)): ApiPath<(DocumentId, DocumentId)>,
) -> ApiResult<StatusCode> {
    user.require(Permission::PatientsWrite)?;
    state.hms.patients().delete_attachment(&id, &file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_escapes_unsafe_characters() {
        assert_eq!(
            disposition("scan \"final\".pdf"),
            "attachment; filename=\"scan _final_.pdf\""
        );
        assert_eq!(disposition("résumé.txt"), "attachment; filename=\"r_sum_.txt\"");
    }
}
