use anyhow::Result;
use axum::Router;
use config::{AppConfig, BackendKind};
use services::{
    backends::{LocalBackend, ObjectStoreBackend, ObjectStoreSettings},
    record_store::{RecordStore, SqliteRecordStore},
    storage_backend::StorageBackend,
    upload_service::UploadService,
    upload_tracker::UploadTracker,
};
use sqlx::sqlite::SqlitePoolOptions;
use state::AppState;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

/// How often finished upload tasks are checked against their TTL.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting cloud-drive on {} (backend {:?}, enabled {})",
        cfg.addr(),
        cfg.backend,
        cfg.storage_enabled
    );

    // --- Ensure working directories exist ---
    let mut dirs = vec![&cfg.temp_dir];
    if cfg.backend == BackendKind::Local {
        dirs.push(&cfg.storage_dir);
    }
    for dir in dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory at {}", dir.display());
        }
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    let db_path = Path::new(db_path.split('?').next().unwrap_or(db_path));
    tracing::debug!("Interpreted SQLite path => {}", db_path.display());

    if !db_url.contains(":memory:") {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }

        // SQLx does not create the database file unless asked in the URL
        match fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(db_path)
        {
            Ok(_) => tracing::debug!("Database file can be created/opened."),
            Err(e) => tracing::warn!("Failed to open database file manually: {}", e),
        }
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // --- Schema ---
    let records = SqliteRecordStore::new(db.clone());
    records.migrate().await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    let records: Arc<dyn RecordStore> = Arc::new(records);

    // --- Storage backend ---
    let backend: Arc<dyn StorageBackend> = match cfg.backend {
        BackendKind::Local => Arc::new(LocalBackend::new(
            cfg.storage_dir.clone(),
            cfg.storage_enabled,
        )),
        BackendKind::ObjectStore => Arc::new(ObjectStoreBackend::new(ObjectStoreSettings {
            enabled: cfg.storage_enabled,
            endpoint: cfg.endpoint.clone(),
            bucket: cfg.bucket.clone(),
            access_key_id: cfg.access_key_id.clone(),
            access_key_secret: cfg.access_key_secret.clone(),
            request_timeout: Some(cfg.request_timeout),
        })?),
    };
    if !backend.is_enabled() {
        tracing::warn!("Storage backend is disabled; uploads will be rejected");
    }

    // --- Upload pipeline ---
    let tracker = Arc::new(UploadTracker::new());
    spawn_task_eviction(Arc::clone(&tracker), cfg.task_ttl);

    let uploads = UploadService::new(
        records,
        Arc::clone(&backend),
        tracker,
        cfg.max_concurrent_uploads,
    );

    let state = AppState {
        uploads,
        backend,
        db,
        temp_dir: cfg.temp_dir.clone(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes, cfg.max_sync_upload_bytes).with_state(state);

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

/// Periodically drop finished upload tasks older than `ttl`.
fn spawn_task_eviction(tracker: Arc<UploadTracker>, ttl: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = tracker.evict_finished(ttl);
            if evicted > 0 {
                tracing::info!(
                    "Evicted {} finished upload tasks, {} remaining",
                    evicted,
                    tracker.len()
                );
            }
        }
    });
}
