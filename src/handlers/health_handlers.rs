//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that round-trips the storage backend

use crate::services::upload_service::UploadService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// `GET /healthz`
///
/// Very small liveness probe: always 200 OK, never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Asks the storage backend for a cheap round-trip. HTTP 200 when it
/// succeeds, HTTP 503 otherwise. Backend error text is logged, not returned.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let storage_check = match service.storage().check().await {
        Ok(()) => CheckStatus {
            ok: true,
            error: None,
        },
        Err(err) => {
            warn!(bucket = service.bucket(), error = %err, "storage readiness check failed");
            CheckStatus {
                ok: false,
                error: Some("storage backend unreachable".into()),
            }
        }
    };

    let overall_ok = storage_check.ok;
    let mut checks = HashMap::new();
    checks.insert("storage", storage_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
