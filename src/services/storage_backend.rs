//! Storage backend contract.
//!
//! A backend stores opaque objects under keys it generates from a
//! destination prefix. Uploads from staged files report progress through
//! typed [`ProgressEvent`]s so the tracker never sees backend-specific
//! callback shapes.

use crate::services::error::DriveResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use uuid::Uuid;

/// One observation emitted while a staged file is transferred.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Transfer is about to start; carries the total size.
    ContentLength(u64),
    /// `n` more bytes were handed to the transport.
    BytesTransferred(u64),
    Completed,
    Failed(String),
}

/// Receives progress events for a single transfer, in order.
pub trait ProgressListener: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Whether the backend is configured for use.
    fn is_enabled(&self) -> bool;

    /// Store in-memory content below `destination`, returning the object key.
    async fn store(&self, content: Bytes, destination: &str) -> DriveResult<String>;

    /// Store a staged local file below `destination`, returning the object key.
    ///
    /// Emits `ContentLength`, zero or more `BytesTransferred`, then exactly
    /// one of `Completed` or `Failed` before returning.
    async fn store_with_progress(
        &self,
        source: &Path,
        destination: &str,
        declared_size: u64,
        listener: &dyn ProgressListener,
    ) -> DriveResult<String>;

    /// Fetch the bytes of an object.
    async fn retrieve(&self, object_key: &str) -> DriveResult<Bytes>;

    /// Remove an object. Removing an absent key succeeds.
    async fn remove(&self, object_key: &str) -> DriveResult<()>;
}

/// Build a fresh object key below `destination`.
pub fn object_key(destination: &str) -> String {
    let name = Uuid::new_v4().simple().to_string();
    if destination.is_empty() {
        name
    } else if destination.ends_with('/') {
        format!("{}{}", destination, name)
    } else {
        format!("{}/{}", destination, name)
    }
}

/// Whether `name` can be used as one segment of an object key on every
/// backend.
pub fn is_safe_segment(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name
            .bytes()
            .any(|b| b == b'/' || b == b'\\' || b.is_ascii_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_joins_with_single_slash() {
        let key = object_key("files/abc");
        assert!(key.starts_with("files/abc/"));
        assert_eq!(key.len(), "files/abc/".len() + 32);

        let key = object_key("files/abc/");
        assert!(!key.contains("//"));
    }

    #[test]
    fn safe_segments() {
        assert!(is_safe_segment("v1..2"));
        assert!(is_safe_segment(".config"));
        assert!(!is_safe_segment(".."));
        assert!(!is_safe_segment("."));
        assert!(!is_safe_segment("a/b"));
        assert!(!is_safe_segment("a\\b"));
        assert!(!is_safe_segment(""));
    }

    #[test]
    fn object_keys_are_unique() {
        assert_ne!(object_key("x"), object_key("x"));
    }
}
