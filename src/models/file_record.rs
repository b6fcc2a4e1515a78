//! Represents a file or folder owned by a user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Root prefix under which each owner's objects are stored.
pub const FILE_PATH_PREFIX: &str = "files/";

/// A single file or folder entry.
///
/// The record stores metadata only. The bytes live in the storage backend
/// under `path`, and several records may share one `path` when uploads were
/// deduplicated. Records are never physically removed; `is_deleted` marks
/// them as gone.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    /// Record identity.
    pub id: Uuid,

    /// Owning principal.
    pub owner_id: Uuid,

    /// Display name, may be changed by a rename.
    pub filename: String,

    /// Name the file was uploaded with.
    pub original_filename: String,

    /// Logical size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Backend object key for files, logical path prefix for folders.
    pub path: String,

    /// Containing folder, `None` for the owner's root.
    pub parent_id: Option<Uuid>,

    pub is_folder: bool,

    /// Hex SHA-256 of the content, absent for folders.
    pub sha256: Option<String>,

    /// Soft-delete marker.
    pub is_deleted: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build a record for freshly stored content.
    pub fn new_file(
        owner_id: Uuid,
        filename: &str,
        path: String,
        size_bytes: i64,
        content_type: Option<String>,
        parent_id: Option<Uuid>,
        sha256: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            filename: filename.to_string(),
            original_filename: filename.to_string(),
            size_bytes,
            content_type,
            path,
            parent_id,
            is_folder: false,
            sha256,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a record that reuses the object of `existing` (instant upload).
    ///
    /// Path, size and content type come from the existing record; name,
    /// owner and parent come from the new upload.
    pub fn linked_to(
        existing: &FileRecord,
        owner_id: Uuid,
        filename: &str,
        parent_id: Option<Uuid>,
        sha256: String,
    ) -> Self {
        Self::new_file(
            owner_id,
            filename,
            existing.path.clone(),
            existing.size_bytes,
            existing.content_type.clone(),
            parent_id,
            Some(sha256),
        )
    }

    /// Build a folder record.
    pub fn new_folder(owner_id: Uuid, name: &str, path: String, parent_id: Option<Uuid>) -> Self {
        let mut record = Self::new_file(owner_id, name, path, 0, None, parent_id, None);
        record.is_folder = true;
        record
    }

    /// Root storage path for an owner, e.g. `files/{owner}`.
    pub fn owner_root(owner_id: Uuid) -> String {
        format!("{}{}", FILE_PATH_PREFIX, owner_id)
    }
}

/// Guess a content type from the file extension.
pub fn content_type_from_filename(filename: &str) -> String {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linked_record_copies_object_fields() {
        let owner = Uuid::new_v4();
        let original = FileRecord::new_file(
            owner,
            "a.txt",
            "files/x/abc".into(),
            5,
            Some("text/plain".into()),
            None,
            Some("h1".into()),
        );
        let folder = Uuid::new_v4();
        let linked = FileRecord::linked_to(&original, owner, "b.txt", Some(folder), "h1".into());

        assert_ne!(linked.id, original.id);
        assert_eq!(linked.path, original.path);
        assert_eq!(linked.size_bytes, 5);
        assert_eq!(linked.content_type.as_deref(), Some("text/plain"));
        assert_eq!(linked.filename, "b.txt");
        assert_eq!(linked.parent_id, Some(folder));
        assert!(!linked.is_deleted);
    }

    #[test]
    fn folder_has_no_digest() {
        let folder = FileRecord::new_folder(Uuid::new_v4(), "docs", "files/x/docs".into(), None);
        assert!(folder.is_folder);
        assert!(folder.sha256.is_none());
    }

    #[test]
    fn content_type_guess() {
        assert_eq!(content_type_from_filename("Report.PDF"), "application/pdf");
        assert_eq!(content_type_from_filename("notes.txt"), "text/plain");
        assert_eq!(content_type_from_filename("noext"), "application/octet-stream");
    }
}
