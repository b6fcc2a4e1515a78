//! Shared state handed to every HTTP handler.

use crate::services::{storage_backend::StorageBackend, upload_service::UploadService};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    pub backend: Arc<dyn StorageBackend>,
    /// Metadata pool, used by the readiness probe.
    pub db: Arc<SqlitePool>,
    /// Directory where async upload bodies are staged.
    pub temp_dir: PathBuf,
}
