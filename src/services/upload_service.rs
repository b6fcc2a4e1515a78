//! UploadService: coordinates hashing, dedup, storage and record
//! persistence for uploads, and owns the other record-level file
//! operations (download, delete, rename, folders, listing).
//!
//! The owner is always passed in explicitly; nothing here reads ambient
//! request state.

use crate::models::file_record::{FileRecord, content_type_from_filename};
use crate::services::{
    dedup::DedupResolver,
    error::{DriveError, DriveResult},
    hasher,
    record_store::RecordStore,
    staging::StagedFile,
    storage_backend::{StorageBackend, is_safe_segment},
    upload_tracker::UploadTracker,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

const FAST_UPLOAD_MESSAGE: &str = "fast upload: content already stored";

/// Content received in full with the request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: Option<String>,
    pub content: Bytes,
    pub parent_id: Option<Uuid>,
}

/// Content staged on disk for a background upload.
#[derive(Debug)]
pub struct StagedUpload {
    pub file: StagedFile,
    pub filename: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct UploadService {
    records: Arc<dyn RecordStore>,
    backend: Arc<dyn StorageBackend>,
    tracker: Arc<UploadTracker>,
    dedup: DedupResolver,
    /// Bounds the number of background uploads running at once.
    workers: Arc<Semaphore>,
}

impl UploadService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        backend: Arc<dyn StorageBackend>,
        tracker: Arc<UploadTracker>,
        max_concurrent_uploads: usize,
    ) -> Self {
        Self {
            dedup: DedupResolver::new(Arc::clone(&records)),
            records,
            backend,
            tracker,
            workers: Arc::new(Semaphore::new(max_concurrent_uploads.max(1))),
        }
    }

    pub fn tracker(&self) -> &Arc<UploadTracker> {
        &self.tracker
    }

    /// Upload content held in memory and return the new record.
    pub async fn upload(&self, owner_id: Uuid, request: UploadRequest) -> DriveResult<FileRecord> {
        self.ensure_backend_enabled()?;

        let digest = hasher::digest_bytes(&request.content).to_hex();
        if let Some(existing) = self.dedup.resolve(Some(&digest), owner_id).await? {
            return self
                .link_existing(&existing, owner_id, &request.filename, request.parent_id, digest, None)
                .await;
        }

        let destination = self.upload_destination(owner_id, request.parent_id).await?;
        let size_bytes = request.content.len() as i64;
        let object_key = self.backend.store(request.content, &destination).await?;

        let content_type = request
            .content_type
            .unwrap_or_else(|| content_type_from_filename(&request.filename));
        let record = FileRecord::new_file(
            owner_id,
            &request.filename,
            object_key,
            size_bytes,
            Some(content_type),
            request.parent_id,
            Some(digest),
        );
        self.persist_new(record).await
    }

    /// Start a background upload of a staged file under `task_id`.
    ///
    /// Returns as soon as the task is registered. The staged file is removed
    /// when the worker finishes, whatever the outcome.
    pub fn submit(
        &self,
        owner_id: Uuid,
        task_id: &str,
        staged: StagedUpload,
    ) -> JoinHandle<DriveResult<FileRecord>> {
        self.tracker
            .create(task_id, &staged.filename, staged.file.size());

        let service = self.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let result = match Arc::clone(&service.workers).acquire_owned().await {
                Ok(_permit) => service.upload_staged(owner_id, &task_id, &staged).await,
                Err(_) => {
                    let err = DriveError::UploadFailed("upload workers shut down".into());
                    service.tracker.complete(&task_id, false, err.to_string());
                    Err(err)
                }
            };
            if let Err(err) = &result {
                error!("upload task {} failed: {}", task_id, err);
            }
            staged.file.remove().await;
            result
        })
    }

    /// Run one staged upload to completion, updating `task_id` as it goes.
    pub async fn upload_staged(
        &self,
        owner_id: Uuid,
        task_id: &str,
        staged: &StagedUpload,
    ) -> DriveResult<FileRecord> {
        let result = self.try_upload_staged(owner_id, task_id, staged).await;
        if let Err(err) = &result {
            self.tracker.complete(task_id, false, err.to_string());
        }
        result
    }

    async fn try_upload_staged(
        &self,
        owner_id: Uuid,
        task_id: &str,
        staged: &StagedUpload,
    ) -> DriveResult<FileRecord> {
        self.ensure_backend_enabled()?;

        let digest = hasher::digest_file(staged.file.path()).await?.to_hex();
        if let Some(existing) = self.dedup.resolve(Some(&digest), owner_id).await? {
            return self
                .link_existing(
                    &existing,
                    owner_id,
                    &staged.filename,
                    staged.parent_id,
                    digest,
                    Some((task_id, staged.file.size())),
                )
                .await;
        }

        let destination = self.upload_destination(owner_id, staged.parent_id).await?;
        let listener = self.tracker.listener(task_id);
        let object_key = self
            .backend
            .store_with_progress(staged.file.path(), &destination, staged.file.size(), &listener)
            .await?;

        let record = FileRecord::new_file(
            owner_id,
            &staged.filename,
            object_key,
            staged.file.size() as i64,
            Some(content_type_from_filename(&staged.filename)),
            staged.parent_id,
            Some(digest),
        );
        self.persist_new(record).await
    }

    /// Persist a record for content that already exists in storage.
    ///
    /// With a task, progress jumps straight to complete once the record is
    /// saved; nothing is sent to the backend.
    async fn link_existing(
        &self,
        existing: &FileRecord,
        owner_id: Uuid,
        filename: &str,
        parent_id: Option<Uuid>,
        digest: String,
        task: Option<(&str, u64)>,
    ) -> DriveResult<FileRecord> {
        let record = FileRecord::linked_to(existing, owner_id, filename, parent_id, digest);
        let saved = self.records.save(&record).await?;
        if let Some((task_id, size)) = task {
            self.tracker.update_progress(task_id, size, size);
            self.tracker.complete(task_id, true, FAST_UPLOAD_MESSAGE);
        }
        info!("fast upload of {} reuses {}", filename, existing.path);
        Ok(saved)
    }

    async fn persist_new(&self, record: FileRecord) -> DriveResult<FileRecord> {
        match self.records.save(&record).await {
            Ok(saved) => {
                info!("stored {} at {}", saved.filename, saved.path);
                Ok(saved)
            }
            Err(err) => {
                warn!("object {} stored but record not saved: {}", record.path, err);
                Err(err)
            }
        }
    }

    /// Backend prefix for new objects: the owner's root or the parent
    /// folder's path.
    async fn upload_destination(&self, owner_id: Uuid, parent_id: Option<Uuid>) -> DriveResult<String> {
        match parent_id {
            None => Ok(FileRecord::owner_root(owner_id)),
            Some(parent_id) => {
                let parent = self.owned_record(parent_id, owner_id).await?;
                if !parent.is_folder {
                    return Err(DriveError::FileNotFound);
                }
                Ok(parent.path)
            }
        }
    }

    fn ensure_backend_enabled(&self) -> DriveResult<()> {
        if self.backend.is_enabled() {
            Ok(())
        } else {
            error!("storage backend is disabled");
            Err(DriveError::BackendDisabled)
        }
    }

    /// Load a live record belonging to `owner_id`.
    async fn owned_record(&self, file_id: Uuid, owner_id: Uuid) -> DriveResult<FileRecord> {
        let record = self
            .records
            .find_by_id(file_id)
            .await?
            .ok_or(DriveError::FileNotFound)?;
        if record.owner_id != owner_id {
            return Err(DriveError::NoPermission);
        }
        if record.is_deleted {
            return Err(DriveError::FileNotFound);
        }
        Ok(record)
    }

    /// Soft-delete a file or empty folder.
    ///
    /// The stored object is removed only when this record is its last live
    /// reference.
    pub async fn delete(&self, file_id: Uuid, owner_id: Uuid) -> DriveResult<()> {
        let mut record = self.owned_record(file_id, owner_id).await?;

        if record.is_folder {
            if self.records.count_non_deleted_children(record.id).await? > 0 {
                return Err(DriveError::FolderNotEmpty);
            }
        } else {
            let references = self.records.count_by_path(&record.path).await?;
            if references <= 1 {
                self.backend.remove(&record.path).await?;
                info!("deleted object from storage: {}", record.path);
            } else {
                info!(
                    "kept object {} still referenced by {} records",
                    record.path, references
                );
            }
        }

        record.is_deleted = true;
        record.updated_at = Utc::now();
        self.records.save(&record).await?;
        Ok(())
    }

    /// Fetch a file's record and content.
    pub async fn download(&self, file_id: Uuid, owner_id: Uuid) -> DriveResult<(FileRecord, Bytes)> {
        let record = self.owned_record(file_id, owner_id).await?;
        if record.is_folder {
            return Err(DriveError::CannotDownloadFolder);
        }
        let content = self.backend.retrieve(&record.path).await?;
        Ok((record, content))
    }

    pub async fn rename(&self, file_id: Uuid, owner_id: Uuid, new_name: &str) -> DriveResult<FileRecord> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(DriveError::InvalidFilename);
        }
        let mut record = self.owned_record(file_id, owner_id).await?;
        record.filename = new_name.to_string();
        record.updated_at = Utc::now();
        self.records.save(&record).await
    }

    pub async fn create_folder(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> DriveResult<FileRecord> {
        let name = name.trim();
        if !is_safe_segment(name) {
            return Err(DriveError::InvalidFilename);
        }
        let parent_path = self.upload_destination(owner_id, parent_id).await?;
        let folder = FileRecord::new_folder(
            owner_id,
            name,
            format!("{}/{}", parent_path.trim_end_matches('/'), name),
            parent_id,
        );
        self.records.save(&folder).await
    }

    pub async fn list(&self, owner_id: Uuid, parent_id: Option<Uuid>) -> DriveResult<Vec<FileRecord>> {
        self.records.list_children(owner_id, parent_id).await
    }

    pub async fn search(&self, owner_id: Uuid, keyword: &str) -> DriveResult<Vec<FileRecord>> {
        self.records.search_by_filename(owner_id, keyword).await
    }
}
