//! HTTP handlers for file operations.
//! Upload bodies arrive as multipart forms with a `file` field; everything
//! else is delegated to `UploadService`.

use crate::{
    errors::AppError,
    handlers::principal::OwnerId,
    models::{file_record::FileRecord, upload_task::UploadTask},
    services::{
        staging::StagedFile,
        upload_service::{StagedUpload, UploadRequest},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tracing::info;
use uuid::Uuid;

const FILE_FIELD: &str = "file";

/// Query params for uploads and listings.
#[derive(Debug, Deserialize)]
pub struct ParentQuery {
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub keyword: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderReq {
    pub name: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RenameReq {
    pub new_filename: String,
}

#[derive(Debug, Serialize)]
pub struct TaskCreated {
    pub task_id: String,
}

/// `POST /files`: upload a file and wait for it to be stored.
///
/// The body is buffered, so the route carries a smaller body limit than
/// `POST /files/progress`.
pub async fn upload_file(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Query(q): Query<ParentQuery>,
    mut multipart: Multipart,
) -> Result<Json<FileRecord>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field_filename(&field);
        let content_type = field.content_type().map(str::to_string);
        let content = field.bytes().await.map_err(bad_multipart)?;

        let record = state
            .uploads
            .upload(
                owner,
                UploadRequest {
                    filename,
                    content_type,
                    content,
                    parent_id: q.parent_id,
                },
            )
            .await?;
        return Ok(Json(record));
    }
    Err(missing_file_field())
}

/// `POST /files/progress`: stage the file and upload it in the background.
///
/// Responds with the task id to poll at `GET /files/progress/{task_id}`.
pub async fn upload_with_progress(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Query(q): Query<ParentQuery>,
    mut multipart: Multipart,
) -> Result<Json<TaskCreated>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field_filename(&field);
        let stream = field.map_err(|err: MultipartError| io::Error::other(err.body_text()));
        let file = StagedFile::stage(&state.temp_dir, stream).await?;
        if file.size() == 0 {
            return Err(AppError::bad_request("file is empty"));
        }

        let task_id = Uuid::new_v4().to_string();
        info!("queued upload task {} for {} ({} bytes)", task_id, filename, file.size());
        // The worker records failures in the task and logs them itself.
        let handle = state.uploads.submit(
            owner,
            &task_id,
            StagedUpload {
                file,
                filename,
                parent_id: q.parent_id,
            },
        );
        drop(handle);
        return Ok(Json(TaskCreated { task_id }));
    }
    Err(missing_file_field())
}

/// `GET /files/progress/{task_id}`: poll an upload task.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<UploadTask>, AppError> {
    state
        .uploads
        .tracker()
        .get(&task_id)
        .map(Json)
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "TASK_NOT_FOUND", "upload task not found"))
}

/// `GET /files?parent_id=`: list a folder.
pub async fn list_files(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Query(q): Query<ParentQuery>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(state.uploads.list(owner, q.parent_id).await?))
}

/// `GET /files/search?keyword=`
pub async fn search_files(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(state.uploads.search(owner, &q.keyword).await?))
}

/// `POST /folders`
pub async fn create_folder(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Json(req): Json<CreateFolderReq>,
) -> Result<impl IntoResponse, AppError> {
    let folder = state
        .uploads
        .create_folder(owner, req.parent_id, &req.name)
        .await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

/// `GET /files/{file_id}/content`: download file bytes.
pub async fn download_file(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(file_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (record, content) = state.uploads.download(file_id, owner).await?;

    let length = content.len();
    let mut response = Response::new(Body::from(content));
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &record, length);
    Ok(response)
}

/// `PATCH /files/{file_id}/name`
pub async fn rename_file(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(file_id): Path<Uuid>,
    Json(req): Json<RenameReq>,
) -> Result<Json<FileRecord>, AppError> {
    let record = state
        .uploads
        .rename(file_id, owner, &req.new_filename)
        .await?;
    Ok(Json(record))
}

/// `DELETE /files/{file_id}`
pub async fn delete_file(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(file_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.uploads.delete(file_id, owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn bad_multipart(err: MultipartError) -> AppError {
    let status = err.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "FILE_TOO_LARGE"
    } else {
        "BAD_REQUEST"
    };
    AppError::new(status, code, err.body_text())
}

fn missing_file_field() -> AppError {
    AppError::bad_request("missing `file` field")
}

fn field_filename(field: &Field<'_>) -> String {
    field
        .file_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or("unnamed")
        .to_string()
}

fn set_file_headers(headers: &mut HeaderMap, record: &FileRecord, length: usize) {
    let content_type = record
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(length),
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        record.filename.replace(['"', '\\'], "_")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&record.updated_at.to_rfc2822())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
}
