use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, StoreBackend};
use services::{
    cleanup::CleanupPool,
    local_store::{LocalObjectStore, run_migrations},
    memory_store::MemoryObjectStore,
    object_store::ObjectStore,
    upload_service::UploadService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting chunked-upload with config: {:?}", cfg);

    // --- Open the object store; failure here is fatal ---
    let store: Arc<dyn ObjectStore> = match cfg.store {
        StoreBackend::Memory => {
            if migrate {
                tracing::info!("Memory store has no schema; nothing to migrate.");
                return Ok(());
            }
            tracing::warn!("Using in-memory object store; uploads are lost on exit");
            Arc::new(MemoryObjectStore::new())
        }
        StoreBackend::Local => {
            let db = connect_metadata_db(&cfg).await?;
            if migrate {
                run_migrations(&db).await?;
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            Arc::new(
                LocalObjectStore::open(db, &cfg.storage_dir, &cfg.bucket)
                    .await
                    .with_context(|| {
                        format!(
                            "initializing object store (bucket `{}`); run with --migrate first on a fresh database",
                            cfg.bucket
                        )
                    })?,
            )
        }
    };

    // --- Initialize core services ---
    let cleanup = CleanupPool::spawn(store.clone(), cfg.cleanup_workers, cfg.cleanup_queue_depth);
    tracing::info!(
        workers = cleanup.worker_count(),
        queue_depth = cfg.cleanup_queue_depth,
        "Chunk cleanup pool started"
    );
    let uploads = UploadService::new(store, cleanup, cfg.merge_guard);
    let state = state::AppState::new(uploads, cfg.max_chunk_bytes);

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_chunk_bytes).with_state(state);

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
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Connect to the SQLite metadata database, creating the storage directory
/// and the database file's parent directory when missing.
async fn connect_metadata_db(cfg: &AppConfig) -> Result<Arc<sqlx::SqlitePool>> {
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to metadata database `{}`", db_url))?;
    Ok(Arc::new(pool))
}
