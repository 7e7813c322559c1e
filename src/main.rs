use anyhow::{Context, Result};
use file_upload::{
    config::{AppConfig, StorageBackend},
    routes,
    services::{
        storage::{CloudStore, LocalStore, ObjectStorage},
        upload_service::UploadService,
    },
};
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::{fs, net::TcpListener};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Optional .env, before anything reads the environment ---
    let dotenv = dotenvy::dotenv();

    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match dotenv {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(err) if err.not_found() => tracing::debug!("No .env file found, using process env"),
        Err(err) => tracing::warn!("Ignoring unreadable .env file: {}", err),
    }

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args().context("loading configuration")?;
    tracing::info!("Starting file-upload with config: {:?}", cfg);

    // --- Storage backend ---
    let storage = build_storage(&cfg).await?;

    // --- Initialize core service ---
    let service = UploadService::new(storage, cfg.bucket.clone(), cfg.policy());

    // --- Build router ---
    let app = routes::routes::routes(service, cfg.credentials());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err).with_context(|| format!("binding {addr}")),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }
    });

    shutdown_signal().await;
    tracing::info!(
        "Shutdown signal received, draining requests for up to {:?}",
        cfg.shutdown_timeout
    );
    shutdown.cancel();

    match tokio::time::timeout(cfg.shutdown_timeout, server).await {
        Ok(joined) => joined.context("server task panicked")??,
        Err(_) => tracing::warn!("Graceful shutdown timed out, exiting with requests in flight"),
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn build_storage(cfg: &AppConfig) -> Result<Arc<dyn ObjectStorage>> {
    match cfg.backend {
        StorageBackend::Gcs => {
            let store = CloudStore::gcs(&cfg.bucket)
                .with_context(|| format!("creating GCS client for bucket {}", cfg.bucket))?;
            tracing::info!(
                bucket = %cfg.bucket,
                project = cfg.gcs_project.as_deref().unwrap_or("<from credentials>"),
                location = %cfg.gcs_location,
                "Using Google Cloud Storage backend"
            );
            Ok(Arc::new(store))
        }
        StorageBackend::Local => {
            // --- Ensure storage directory exists ---
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir).await?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            tracing::info!(bucket = %cfg.bucket, dir = %cfg.storage_dir, "Using local disk backend");
            Ok(Arc::new(LocalStore::new(&cfg.storage_dir)))
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
