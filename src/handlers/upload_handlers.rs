//! `POST /upload`: multipart form with a single `file` part.

use crate::{
    errors::AppError,
    models::upload::{StoredObjectDescriptor, UploadRequest},
    services::upload_service::UploadService,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Form field carrying the uploaded file.
pub const FILE_FIELD: &str = "file";

pub async fn upload_file(
    State(service): State<UploadService>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let mut multipart = multipart.map_err(|rejection| {
        warn!(error = %rejection, "rejected non-multipart upload");
        AppError::bad_request("expected a multipart/form-data body")
    })?;

    let field = loop {
        let next = multipart.next_field().await.map_err(|err| {
            warn!(error = %err, "malformed multipart body");
            AppError::bad_request("malformed multipart body")
        })?;
        match next {
            Some(field) if field.name() == Some(FILE_FIELD) => break field,
            Some(field) => debug!(name = ?field.name(), "skipping form field"),
            None => {
                return Err(AppError::bad_request(format!(
                    "missing `{FILE_FIELD}` form field"
                )));
            }
        }
    };

    let filename = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().map(str::to_string);
    let declared_size = field
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let body = field.map(|chunk| chunk.map_err(io::Error::other)).boxed();
    let mut request = UploadRequest::new(filename, body);
    if let Some(content_type) = content_type {
        request = request.with_content_type(content_type);
    }
    if let Some(size) = declared_size {
        request = request.with_declared_size(size);
    }

    // Dropping this handler (client gone) cancels any pending retries.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let stored = service.upload_file(&cancel, request).await?;
    Ok(success_response(stored))
}

fn success_response(stored: StoredObjectDescriptor) -> Response {
    let mut response = Json(stored).into_response();
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}
