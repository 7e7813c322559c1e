use crate::services::{classifier::ClassifyError, upload_service::UploadError};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Error returned to HTTP clients as `{code, message, details}`.
///
/// The message is always safe to show: no filesystem paths, no backend error
/// text. Causes are logged where the error is produced.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub details: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: u16,
    message: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    details: &'a [String],
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            details: Vec::new(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn with_details(mut self, details: impl IntoIterator<Item = String>) -> Self {
        self.details.extend(details);
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            code: self.status.as_u16(),
            message: &self.message,
            details: &self.details,
        });

        let mut response = (self.status, body).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="file-upload""#),
            );
        }
        response
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let reason = err.reject_reason().map(|r| r.to_string());
        match err {
            UploadError::TypeNotAllowed {
                ref mime_type,
                ref allowed,
            } => AppError::bad_request(format!("file type `{mime_type}` is not allowed"))
                .with_details(reason.into_iter().chain([format!(
                    "allowed types: {}",
                    allowed.join(", ")
                )])),
            UploadError::SizeExceeded { limit, .. } => AppError::bad_request(err.to_string())
                .with_details(
                    reason
                        .into_iter()
                        .chain([format!("maximum size: {limit} bytes")]),
                ),
            UploadError::BodyRead(_) => AppError::bad_request("failed to read upload body"),
            UploadError::Classification(ref cause) => {
                let what = match cause {
                    ClassifyError::EmptyFilename => "empty filename",
                    ClassifyError::EmptyStream => "file is empty",
                    ClassifyError::Read(_) => "file could not be read",
                };
                AppError::internal(format!("file could not be classified: {what}"))
            }
            UploadError::Storage(_) | UploadError::Cancelled => AppError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::retry_writer::WriteError;
    use crate::services::storage::StorageError;
    use serde_json::{Value, json};
    use std::io;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn type_rejection_is_a_400_with_allowed_types() {
        let err = AppError::from(UploadError::TypeNotAllowed {
            mime_type: "image/png".into(),
            allowed: vec!["application/json".into(), "text/csv".into()],
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({
                "code": 400,
                "message": "file type `image/png` is not allowed",
                "details": ["type-not-allowed", "allowed types: application/json, text/csv"],
            })
        );
    }

    #[tokio::test]
    async fn size_rejection_names_the_limit() {
        let response = AppError::from(UploadError::SizeExceeded {
            size: 20,
            limit: 10,
        })
        .into_response();
        let body = body_json(response).await;
        assert_eq!(body["code"], 400);
        assert_eq!(body["details"][0], "size-exceeded");
        assert_eq!(body["details"][1], "maximum size: 10 bytes");
    }

    #[tokio::test]
    async fn backend_failures_do_not_leak_causes() {
        let err = UploadError::Storage(WriteError::Exhausted {
            attempts: 4,
            source: StorageError::Io(io::Error::other("/var/secret/path unreachable")),
        });
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body, json!({"code": 500, "message": "failed to store file"}));
    }

    #[tokio::test]
    async fn classification_read_errors_are_generic() {
        let err = UploadError::Classification(ClassifyError::Read(io::Error::other(
            "/tmp/multipart-1234: broken pipe",
        )));
        let body = body_json(AppError::from(err).into_response()).await;
        assert_eq!(body["message"], "file could not be classified: file could not be read");
    }

    #[test]
    fn unauthorized_carries_challenge() {
        let response = AppError::unauthorized("authentication required").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}
