//! Local filesystem backend.
//!
//! Objects live beneath `base_path/{shard}/{shard}/{key}`, where the shards
//! are the first two bytes of MD5(key). Writes go to a temporary file that
//! is fsynced and renamed into place, so readers never observe partial
//! objects.

use crate::services::{
    error::{DriveError, DriveResult},
    storage_backend::{ProgressEvent, ProgressListener, StorageBackend, object_key},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Clone, Debug)]
pub struct LocalBackend {
    base_path: PathBuf,
    enabled: bool,
}

impl LocalBackend {
    pub fn new(base_path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            base_path: base_path.into(),
            enabled,
        }
    }

    fn ensure_enabled(&self) -> DriveResult<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(DriveError::BackendDisabled)
        }
    }

    /// Reject keys that could escape `base_path`.
    fn ensure_key_safe(key: &str) -> io::Result<()> {
        let unsafe_key = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.split('/').any(|segment| segment == ".." || segment == ".")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if unsafe_key {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid object key `{}`", key),
            ));
        }
        Ok(())
    }

    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Write a chunk stream to the object path for `key`.
    ///
    /// Calls `on_chunk` after each chunk lands in the temp file. The temp
    /// file is removed on every failure path.
    async fn write_object<S, F>(&self, key: &str, stream: S, mut on_chunk: F) -> io::Result<()>
    where
        S: Stream<Item = io::Result<Bytes>>,
        F: FnMut(u64),
    {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let result = async {
            let mut file = File::create(&tmp_path).await?;
            pin_mut!(stream);
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                on_chunk(chunk.len() as u64);
            }
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }

    /// Remove empty shard directories up to `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn store(&self, content: Bytes, destination: &str) -> DriveResult<String> {
        self.ensure_enabled()?;
        let key = object_key(destination);
        self.write_object(&key, futures::stream::once(async { Ok(content) }), |_| {})
            .await
            .map_err(|err| DriveError::UploadFailed(err.to_string()))?;
        debug!("stored object {}", key);
        Ok(key)
    }

    async fn store_with_progress(
        &self,
        source: &Path,
        destination: &str,
        declared_size: u64,
        listener: &dyn ProgressListener,
    ) -> DriveResult<String> {
        if let Err(err) = self.ensure_enabled() {
            listener.on_event(ProgressEvent::Failed(err.to_string()));
            return Err(err);
        }

        let is_file = fs::metadata(source)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            let err = DriveError::FileMissing(source.display().to_string());
            listener.on_event(ProgressEvent::Failed(err.to_string()));
            return Err(err);
        }

        let key = object_key(destination);
        listener.on_event(ProgressEvent::ContentLength(declared_size));
        let result = async {
            let file = File::open(source).await?;
            self.write_object(&key, ReaderStream::new(file), |n| {
                listener.on_event(ProgressEvent::BytesTransferred(n))
            })
            .await
        }
        .await;

        match result {
            Ok(()) => {
                listener.on_event(ProgressEvent::Completed);
                Ok(key)
            }
            Err(err) => {
                let err = DriveError::UploadFailed(err.to_string());
                listener.on_event(ProgressEvent::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn retrieve(&self, object_key: &str) -> DriveResult<Bytes> {
        self.ensure_enabled()?;
        Self::ensure_key_safe(object_key)
            .map_err(|err| DriveError::DownloadFailed(err.to_string()))?;
        match fs::read(self.object_path(object_key)).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(DriveError::ObjectNotFound(object_key.to_string()))
            }
            Err(err) => Err(DriveError::DownloadFailed(err.to_string())),
        }
    }

    async fn remove(&self, object_key: &str) -> DriveResult<()> {
        self.ensure_enabled()?;
        Self::ensure_key_safe(object_key)
            .map_err(|err| DriveError::DeleteFailed(err.to_string()))?;
        let file_path = self.object_path(object_key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(DriveError::DeleteFailed(err.to_string())),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressListener for Recorder {
        fn on_event(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn store_retrieve_remove() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path(), true);

        let key = backend
            .store(Bytes::from_static(b"hello"), "files/owner")
            .await
            .unwrap();
        assert!(key.starts_with("files/owner/"));
        assert_eq!(backend.retrieve(&key).await.unwrap(), Bytes::from_static(b"hello"));

        backend.remove(&key).await.unwrap();
        assert!(matches!(
            backend.retrieve(&key).await,
            Err(DriveError::ObjectNotFound(_))
        ));
        // removing again is not an error
        backend.remove(&key).await.unwrap();
    }

    #[tokio::test]
    async fn remove_prunes_shard_directories() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path(), true);
        let key = backend.store(Bytes::from_static(b"x"), "p").await.unwrap();
        backend.remove(&key).await.unwrap();

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_events_are_ordered() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("staged.bin");
        let data = vec![7u8; 20_000];
        fs::write(&source, &data).await.unwrap();

        let backend = LocalBackend::new(dir.path().join("objects"), true);
        let recorder = Recorder::default();
        let key = backend
            .store_with_progress(&source, "files/o", data.len() as u64, &recorder)
            .await
            .unwrap();

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events.first(), Some(&ProgressEvent::ContentLength(20_000)));
        assert_eq!(events.last(), Some(&ProgressEvent::Completed));
        let sent: u64 = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::BytesTransferred(n) => Some(*n),
                _ => None,
            })
            .sum();
        assert_eq!(sent, 20_000);
        assert_eq!(backend.retrieve(&key).await.unwrap().len(), 20_000);
    }

    #[tokio::test]
    async fn missing_source_reports_failure() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path(), true);
        let recorder = Recorder::default();
        let err = backend
            .store_with_progress(&dir.path().join("nope"), "d", 3, &recorder)
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::FileMissing(_)));
        let events = recorder.0.lock().unwrap().clone();
        assert!(matches!(events.as_slice(), [ProgressEvent::Failed(_)]));
    }

    #[tokio::test]
    async fn disabled_backend_fails_fast() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path(), false);
        assert!(matches!(
            backend.store(Bytes::from_static(b"x"), "d").await,
            Err(DriveError::BackendDisabled)
        ));
        assert!(matches!(
            backend.remove("d/x").await,
            Err(DriveError::BackendDisabled)
        ));
    }

    #[test]
    fn unsafe_keys_rejected() {
        assert!(LocalBackend::ensure_key_safe("../etc/passwd").is_err());
        assert!(LocalBackend::ensure_key_safe("/abs").is_err());
        assert!(LocalBackend::ensure_key_safe("").is_err());
        assert!(LocalBackend::ensure_key_safe("files/a/b").is_ok());
        assert!(LocalBackend::ensure_key_safe("files/a/../b").is_err());
        assert!(LocalBackend::ensure_key_safe("files/./b").is_err());
        assert!(LocalBackend::ensure_key_safe("files/v1..2/obj").is_ok());
        assert!(LocalBackend::ensure_key_safe("files/..hidden/obj").is_ok());
    }
}
