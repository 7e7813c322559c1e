//! Defines all routes:
//! - `POST /upload`: authenticated multipart upload of one file
//! - `GET  /healthz`: liveness
//! - `GET  /readyz`: readiness (storage round-trip)

use crate::{
    auth::{Credentials, require_basic_auth},
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::upload_file,
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and part headers around the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Build the application router with its state attached.
///
/// Only `/upload` sits behind basic auth; the probes stay open for the
/// orchestrator.
pub fn routes(service: UploadService, credentials: Credentials) -> Router {
    let body_limit = usize::try_from(service.policy().max_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let upload = Router::new()
        .route("/upload", post(upload_file))
        .route_layer(from_fn_with_state(
            Arc::new(credentials),
            require_basic_auth,
        ))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(upload)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
