//! Defines routes for the drive API.
//!
//! ## Structure
//! - **Files**
//!   - `POST   /files`: upload and wait for storage
//!   - `GET    /files?parent_id=`: list a folder (root when absent)
//!   - `GET    /files/search?keyword=`: filename search
//!   - `GET    /files/{file_id}/content`: download
//!   - `PATCH  /files/{file_id}/name`: rename
//!   - `DELETE /files/{file_id}`: soft-delete
//!
//! - **Async uploads**
//!   - `POST   /files/progress`: stage and upload in the background
//!   - `GET    /files/progress/{task_id}`: poll a task
//!
//! - **Folders**
//!   - `POST   /folders`: create a folder
//!
//! Every route except the health probes and task polling requires the
//! `x-owner-id` header.

use crate::{
    handlers::{
        file_handlers::{
            create_folder, delete_file, download_file, get_progress, list_files, rename_file,
            search_files, upload_file, upload_with_progress,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    handler::Handler,
    routing::{delete, get, patch, post},
};

/// Build the router.
///
/// Request bodies larger than `max_upload_bytes` are rejected. `POST /files`
/// buffers the whole file and is held to `max_sync_upload_bytes` instead.
pub fn routes(max_upload_bytes: usize, max_sync_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/files",
            post(upload_file.layer(DefaultBodyLimit::max(max_sync_upload_bytes))).get(list_files),
        )
        .route("/files/search", get(search_files))
        .route("/files/progress", post(upload_with_progress))
        .route("/files/progress/{task_id}", get(get_progress))
        .route("/files/{file_id}", delete(delete_file))
        .route("/files/{file_id}/content", get(download_file))
        .route("/files/{file_id}/name", patch(rename_file))
        .route("/folders", post(create_folder))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
