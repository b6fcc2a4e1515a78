//! Core data models for the cloud drive.
//!
//! `FileRecord` maps to the `files` table via `sqlx::FromRow`; `UploadTask`
//! lives only in memory inside the upload tracker. Both serialize as JSON
//! via `serde`.

pub mod file_record;
pub mod upload_task;
