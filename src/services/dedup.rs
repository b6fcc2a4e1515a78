//! Instant-upload lookup.

use crate::models::file_record::FileRecord;
use crate::services::{error::DriveResult, record_store::RecordStore};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Finds an existing object an upload can reuse.
#[derive(Clone)]
pub struct DedupResolver {
    records: Arc<dyn RecordStore>,
}

impl DedupResolver {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Earliest-created live file of `owner_id` with the same digest.
    ///
    /// An absent or empty digest never matches, so content without a hash
    /// is always uploaded in full.
    pub async fn resolve(
        &self,
        digest: Option<&str>,
        owner_id: Uuid,
    ) -> DriveResult<Option<FileRecord>> {
        let Some(digest) = digest.filter(|d| !d.is_empty()) else {
            return Ok(None);
        };
        let existing = self
            .records
            .find_by_digest_and_owner(digest, owner_id)
            .await?
            .into_iter()
            .filter(|record| !record.is_deleted && !record.is_folder)
            .min_by_key(|record| record.created_at);
        if let Some(record) = &existing {
            debug!("digest {} already stored at {}", digest, record.path);
        }
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::record_store::memory_store;
    use chrono::{Duration, Utc};

    fn file(owner: Uuid, path: &str, digest: &str) -> FileRecord {
        FileRecord::new_file(owner, "f", path.into(), 5, None, None, Some(digest.into()))
    }

    #[tokio::test]
    async fn empty_digest_never_matches() {
        let store = memory_store().await;
        let owner = Uuid::new_v4();
        store.save(&file(owner, "p", "")).await.unwrap();
        let resolver = DedupResolver::new(Arc::new(store));

        assert!(resolver.resolve(None, owner).await.unwrap().is_none());
        assert!(resolver.resolve(Some(""), owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_owners_are_not_reused() {
        let store = memory_store().await;
        store.save(&file(Uuid::new_v4(), "p", "h1")).await.unwrap();
        let resolver = DedupResolver::new(Arc::new(store));

        assert!(resolver.resolve(Some("h1"), Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn earliest_created_wins() {
        let store = memory_store().await;
        let owner = Uuid::new_v4();
        let mut first = file(owner, "p1", "h1");
        first.created_at = Utc::now() - Duration::hours(1);
        let second = file(owner, "p2", "h1");
        store.save(&second).await.unwrap();
        store.save(&first).await.unwrap();
        let resolver = DedupResolver::new(Arc::new(store));

        let hit = resolver.resolve(Some("h1"), owner).await.unwrap().unwrap();
        assert_eq!(hit.id, first.id);
        assert_eq!(hit.path, "p1");
    }
}
