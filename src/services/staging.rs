//! Local staging of upload bodies for background workers.
//!
//! A request body only lives as long as its request, so asynchronous
//! uploads are first written to a temporary file. [`StagedFile`] owns that
//! file and deletes it when dropped.

use crate::services::error::DriveResult;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    size: u64,
}

impl StagedFile {
    /// Write `stream` into a new file under `dir`.
    ///
    /// The partial file is removed if the stream or a write fails.
    pub async fn stage<S>(dir: &Path, stream: S) -> DriveResult<Self>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        tokio::fs::create_dir_all(dir).await?;
        let mut staged = StagedFile {
            path: dir.join(format!("{}.upload", Uuid::new_v4())),
            size: 0,
        };

        let mut file = File::create(&staged.path).await?;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            staged.size += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!("staged {} bytes at {}", staged.size, staged.path.display());
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl StagedFile {
    /// Delete the file without blocking the runtime.
    ///
    /// Workers call this on their normal exit path; `Drop` only catches the
    /// cases where a `StagedFile` is abandoned early.
    pub async fn remove(mut self) {
        let path = std::mem::take(&mut self.path);
        log_removal(&path, tokio::fs::remove_file(&path).await);
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        log_removal(&self.path, std::fs::remove_file(&self.path));
    }
}

fn log_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!("removed staged file {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove staged file {}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn staged_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"de"))];
        let staged = StagedFile::stage(dir.path(), stream::iter(chunks))
            .await
            .unwrap();

        let path = staged.path().to_path_buf();
        assert_eq!(staged.size(), 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcde");

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn explicit_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![Ok(Bytes::from_static(b"payload"))];
        let staged = StagedFile::stage(dir.path(), stream::iter(chunks))
            .await
            .unwrap();
        let path = staged.path().to_path_buf();

        staged.remove().await;
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_stream_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "reset")),
        ];
        assert!(StagedFile::stage(dir.path(), stream::iter(chunks)).await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
