//! Error taxonomy shared by the upload pipeline, the storage backends and
//! the record store.

use std::io;
use thiserror::Error;

/// Broad category of a [`DriveError`], used for HTTP status mapping and for
/// deciding whether a failure is a caller mistake or a transfer problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    InvalidState,
    BackendUnavailable,
    TransferFailure,
    HashComputationError,
    Internal,
}

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("file not found")]
    FileNotFound,
    #[error("no permission to access this file")]
    NoPermission,
    #[error("folder is not empty")]
    FolderNotEmpty,
    #[error("cannot download a folder")]
    CannotDownloadFolder,
    #[error("filename must not be empty")]
    InvalidFilename,
    #[error("storage backend is disabled")]
    BackendDisabled,
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("delete failed: {0}")]
    DeleteFailed(String),
    #[error("object `{0}` not found in storage")]
    ObjectNotFound(String),
    #[error("staged file `{0}` is missing or not a regular file")]
    FileMissing(String),
    #[error("failed to compute content digest: {0}")]
    HashComputation(#[source] io::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type DriveResult<T> = Result<T, DriveError>;

impl DriveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriveError::FileNotFound | DriveError::ObjectNotFound(_) => ErrorKind::NotFound,
            DriveError::NoPermission => ErrorKind::PermissionDenied,
            DriveError::FolderNotEmpty
            | DriveError::CannotDownloadFolder
            | DriveError::InvalidFilename => ErrorKind::InvalidState,
            DriveError::BackendDisabled => ErrorKind::BackendUnavailable,
            DriveError::UploadFailed(_)
            | DriveError::DownloadFailed(_)
            | DriveError::DeleteFailed(_)
            | DriveError::FileMissing(_) => ErrorKind::TransferFailure,
            DriveError::HashComputation(_) => ErrorKind::HashComputationError,
            DriveError::Database(_) | DriveError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DriveError::FileNotFound => "FILE_NOT_FOUND",
            DriveError::NoPermission => "NO_PERMISSION",
            DriveError::FolderNotEmpty => "FOLDER_NOT_EMPTY",
            DriveError::CannotDownloadFolder => "CANNOT_DOWNLOAD_FOLDER",
            DriveError::InvalidFilename => "INVALID_FILENAME",
            DriveError::BackendDisabled => "STORAGE_DISABLED",
            DriveError::UploadFailed(_) => "STORAGE_UPLOAD_FAILED",
            DriveError::DownloadFailed(_) => "STORAGE_DOWNLOAD_FAILED",
            DriveError::DeleteFailed(_) => "STORAGE_DELETE_FAILED",
            DriveError::ObjectNotFound(_) => "OBJECT_NOT_FOUND",
            DriveError::FileMissing(_) => "FILE_UPLOAD_FAILED",
            DriveError::HashComputation(_) => "HASH_COMPUTATION_FAILED",
            DriveError::Database(_) | DriveError::Io(_) => "SYSTEM_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_transfer_failures() {
        assert_eq!(DriveError::FileNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(DriveError::NoPermission.kind(), ErrorKind::PermissionDenied);
        assert_eq!(DriveError::FolderNotEmpty.kind(), ErrorKind::InvalidState);
        assert_eq!(DriveError::BackendDisabled.kind(), ErrorKind::BackendUnavailable);
        assert_eq!(
            DriveError::UploadFailed("reset".into()).kind(),
            ErrorKind::TransferFailure
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(DriveError::FolderNotEmpty.code(), "FOLDER_NOT_EMPTY");
        assert_eq!(DriveError::BackendDisabled.code(), "STORAGE_DISABLED");
        let err = DriveError::HashComputation(io::Error::other("eof"));
        assert_eq!(err.code(), "HASH_COMPUTATION_FAILED");
        assert_eq!(err.kind(), ErrorKind::HashComputationError);
    }
}
