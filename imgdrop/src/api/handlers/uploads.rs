use crate::AppState;
use crate::api::models::uploads::{ErrorResponse, UploadResponse};
use crate::errors::{Error, Result};
use crate::{public_url, upload};
use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{Field, MultipartError, MultipartRejection},
    },
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};

/// Multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

#[utoipa::path(
    post,
    path = "/upload",
    tag = "uploads",
    summary = "Upload image",
    description = "Upload a single JPEG, PNG or GIF image in the `file` field of a multipart form. \
The declared content type of the part is checked against the allow list and the body against the size limit. \
The file is stored under a generated name and its public URL returned.

Errors are reported in the `error` key of the body. The status is 200 unless the server runs with `upload.error_status_codes`.",
    request_body(
        content_type = "multipart/form-data",
        description = "Multipart form with a `file` part carrying a filename and content type"
    ),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "No file uploaded (only with error_status_codes)", body = ErrorResponse),
        (status = 413, description = "File too large (only with error_status_codes)", body = ErrorResponse),
        (status = 415, description = "Invalid file type (only with error_status_codes)", body = ErrorResponse),
        (status = 429, description = "Too many concurrent uploads (only with error_status_codes)", body = ErrorResponse),
        (status = 500, description = "File upload failed (only with error_status_codes)", body = ErrorResponse)
    )
)]
pub async fn upload_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    match receive_upload(&state, &headers, &uri, multipart).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            let status = err.status_code();
            let mut response = err.into_response();
            if state.config.upload.error_status_codes {
                *response.status_mut() = status;
            }
            response
        }
    }
}

async fn receive_upload(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<UploadResponse> {
    let _permit = state.limiters.acquire_upload().await?;

    // A body that is not multipart at all carries no file
    let mut multipart = multipart.map_err(|e| {
        tracing::debug!("Request is not a multipart form: {}", e);
        Error::NoFileUploaded
    })?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| body_error(e, state.policy.max_file_size(), || Error::NoFileUploaded))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        // Browsers send an empty filename when no file was picked
        let Some(file_name) = field.file_name().filter(|name| !name.is_empty()).map(str::to_owned) else {
            tracing::debug!("Ignoring '{}' part without a filename", FILE_FIELD);
            continue;
        };

        return store_image(state, headers, uri, field, file_name).await;
    }

    Err(Error::NoFileUploaded)
}

#[tracing::instrument(skip_all, fields(file_name = %file_name))]
async fn store_image(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
    mut field: Field<'_>,
    file_name: String,
) -> Result<UploadResponse> {
    let upload_config = &state.config.upload;

    state.store.ensure_directory().await.map_err(|e| Error::UploadFailed {
        reason: format!("creating upload directory {}: {e}", state.store.directory().display()),
    })?;

    let declared = field.content_type().unwrap_or_default().to_string();
    let format = state.policy.check_declared_type(&declared)?;

    let mut staged = state.store.stage().await.map_err(|e| Error::UploadFailed {
        reason: format!("staging upload: {e}"),
    })?;

    // Stop reading as soon as the limit is crossed; the staged file is removed on drop
    while let Some(chunk) = field.chunk().await.map_err(|e| {
        body_error(e, state.policy.max_file_size(), || Error::UploadFailed {
            reason: "upload body ended unexpectedly".to_string(),
        })
    })? {
        state.policy.check_size(staged.len() + chunk.len() as u64)?;
        staged.write_chunk(&chunk).await.map_err(|e| Error::UploadFailed {
            reason: format!("writing staged upload: {e}"),
        })?;
    }

    state.policy.check_content(format, staged.head())?;

    let stored_name = upload::stored_file_name(upload::extension_of(&file_name));
    let base = public_url::resolve_base_url(upload_config, headers, uri)?;
    let url = public_url::file_url(&base, &upload_config.public_path, &stored_name)?;

    let bytes = staged.len();
    let path = state.store.persist(staged, &stored_name).await.map_err(|e| Error::UploadFailed {
        reason: format!("moving upload into place as {stored_name}: {e}"),
    })?;

    tracing::info!(
        content_type = %declared,
        bytes,
        stored_as = %path.display(),
        "Stored upload"
    );

    Ok(UploadResponse { url: url.into() })
}

/// Map a multipart read failure: hitting the body limit is a size error, anything else is
/// whatever the caller considers a broken body at that point.
fn body_error(err: MultipartError, limit_bytes: u64, otherwise: impl FnOnce() -> Error) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return Error::FileTooLarge { limit_bytes };
    }
    tracing::debug!("Failed to read multipart body: {}", err);
    otherwise()
}
