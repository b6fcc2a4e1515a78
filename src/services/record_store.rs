//! Persistence of file records.
//!
//! [`RecordStore`] is the narrow contract the upload pipeline depends on.
//! [`SqliteRecordStore`] implements it on the `files` table. Every query
//! except `find_by_id` skips soft-deleted rows.

use crate::models::file_record::FileRecord;
use crate::services::error::DriveResult;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, owner_id, filename, original_filename, size_bytes, content_type, \
     path, parent_id, is_folder, sha256, is_deleted, created_at, updated_at";

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Non-deleted records of `owner_id` with the given digest, oldest first.
    async fn find_by_digest_and_owner(
        &self,
        digest: &str,
        owner_id: Uuid,
    ) -> DriveResult<Vec<FileRecord>>;

    /// Look up a record by id, including soft-deleted ones.
    async fn find_by_id(&self, id: Uuid) -> DriveResult<Option<FileRecord>>;

    /// Insert or update a record.
    async fn save(&self, record: &FileRecord) -> DriveResult<FileRecord>;

    /// Number of non-deleted records pointing at `path`.
    async fn count_by_path(&self, path: &str) -> DriveResult<i64>;

    /// Number of non-deleted records inside folder `parent_id`.
    async fn count_non_deleted_children(&self, parent_id: Uuid) -> DriveResult<i64>;

    /// Non-deleted records of `owner_id` directly under `parent_id`
    /// (`None` for the root), folders first then by name.
    async fn list_children(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> DriveResult<Vec<FileRecord>>;

    /// Non-deleted records of `owner_id` whose name contains `keyword`,
    /// ignoring ASCII case.
    async fn search_by_filename(&self, owner_id: Uuid, keyword: &str)
    -> DriveResult<Vec<FileRecord>>;
}

#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> DriveResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_by_digest_and_owner(
        &self,
        digest: &str,
        owner_id: Uuid,
    ) -> DriveResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE sha256 = ? AND owner_id = ? AND is_deleted = 0 AND is_folder = 0
             ORDER BY created_at ASC, rowid ASC"
        );
        let rows = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(digest)
            .bind(owner_id)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    async fn find_by_id(&self, id: Uuid) -> DriveResult<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?");
        let row = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row)
    }

    async fn save(&self, record: &FileRecord) -> DriveResult<FileRecord> {
        let sql = format!(
            "INSERT INTO files ({FILE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 filename = excluded.filename,
                 size_bytes = excluded.size_bytes,
                 content_type = excluded.content_type,
                 path = excluded.path,
                 parent_id = excluded.parent_id,
                 sha256 = excluded.sha256,
                 is_deleted = excluded.is_deleted,
                 updated_at = excluded.updated_at
             RETURNING {FILE_COLUMNS}"
        );
        let saved = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(record.id)
            .bind(record.owner_id)
            .bind(&record.filename)
            .bind(&record.original_filename)
            .bind(record.size_bytes)
            .bind(record.content_type.as_deref())
            .bind(&record.path)
            .bind(record.parent_id)
            .bind(record.is_folder)
            .bind(record.sha256.as_deref())
            .bind(record.is_deleted)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_one(&*self.db)
            .await?;
        Ok(saved)
    }

    async fn count_by_path(&self, path: &str) -> DriveResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM files WHERE path = ? AND is_deleted = 0 AND is_folder = 0",
        )
        .bind(path)
        .fetch_one(&*self.db)
        .await?;
        Ok(count)
    }

    async fn count_non_deleted_children(&self, parent_id: Uuid) -> DriveResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM files WHERE parent_id = ? AND is_deleted = 0",
        )
        .bind(parent_id)
        .fetch_one(&*self.db)
        .await?;
        Ok(count)
    }

    async fn list_children(
        &self,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> DriveResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE owner_id = ? AND parent_id IS ? AND is_deleted = 0
             ORDER BY is_folder DESC, filename ASC"
        );
        let rows = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(owner_id)
            .bind(parent_id)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    async fn search_by_filename(
        &self,
        owner_id: Uuid,
        keyword: &str,
    ) -> DriveResult<Vec<FileRecord>> {
        let pattern = format!("%{}%", escape_like(keyword));
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE owner_id = ? AND is_deleted = 0 AND filename LIKE ? ESCAPE '\\'
             ORDER BY filename ASC"
        );
        let rows = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(owner_id)
            .bind(pattern)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }
}

fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// In-memory SQLite store with the schema applied.
#[cfg(test)]
pub async fn memory_store() -> SqliteRecordStore {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteRecordStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn file(owner: Uuid, name: &str, path: &str, digest: &str) -> FileRecord {
        FileRecord::new_file(
            owner,
            name,
            path.to_string(),
            5,
            Some("text/plain".into()),
            None,
            Some(digest.to_string()),
        )
    }

    #[tokio::test]
    async fn save_and_find() {
        let store = memory_store().await;
        let record = file(Uuid::new_v4(), "a.txt", "files/o/1", "h1");
        let saved = store.save(&record).await.unwrap();
        assert_eq!(saved.id, record.id);

        let found = store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(found.path, "files/o/1");
        assert_eq!(found.sha256.as_deref(), Some("h1"));
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_updates_existing_row() {
        let store = memory_store().await;
        let mut record = file(Uuid::new_v4(), "a.txt", "files/o/1", "h1");
        store.save(&record).await.unwrap();

        record.is_deleted = true;
        record.filename = "b.txt".into();
        store.save(&record).await.unwrap();

        let found = store.find_by_id(record.id).await.unwrap().unwrap();
        assert!(found.is_deleted);
        assert_eq!(found.filename, "b.txt");
    }

    #[tokio::test]
    async fn digest_lookup_is_owner_scoped_and_oldest_first() {
        let store = memory_store().await;
        let owner = Uuid::new_v4();

        let mut newer = file(owner, "newer", "files/o/2", "h1");
        let mut older = file(owner, "older", "files/o/1", "h1");
        older.created_at = Utc::now() - Duration::minutes(5);
        newer.created_at = Utc::now();
        store.save(&newer).await.unwrap();
        store.save(&older).await.unwrap();
        store
            .save(&file(Uuid::new_v4(), "other", "files/x/1", "h1"))
            .await
            .unwrap();

        let hits = store.find_by_digest_and_owner("h1", owner).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, older.id);

        older.is_deleted = true;
        store.save(&older).await.unwrap();
        let hits = store.find_by_digest_and_owner("h1", owner).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, newer.id);
    }

    #[tokio::test]
    async fn counts_skip_deleted_rows() {
        let store = memory_store().await;
        let owner = Uuid::new_v4();
        let folder = FileRecord::new_folder(owner, "docs", "files/o/docs".into(), None);
        store.save(&folder).await.unwrap();

        let mut a = file(owner, "a", "files/o/1", "h1");
        a.parent_id = Some(folder.id);
        let b = file(owner, "b", "files/o/1", "h1");
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        assert_eq!(store.count_by_path("files/o/1").await.unwrap(), 2);
        assert_eq!(store.count_non_deleted_children(folder.id).await.unwrap(), 1);

        a.is_deleted = true;
        store.save(&a).await.unwrap();
        assert_eq!(store.count_by_path("files/o/1").await.unwrap(), 1);
        assert_eq!(store.count_non_deleted_children(folder.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_and_search() {
        let store = memory_store().await;
        let owner = Uuid::new_v4();
        let folder = FileRecord::new_folder(owner, "zeta", "files/o/zeta".into(), None);
        store.save(&folder).await.unwrap();
        store.save(&file(owner, "Alpha.txt", "p1", "h1")).await.unwrap();
        store.save(&file(owner, "beta_1.txt", "p2", "h2")).await.unwrap();

        let root = store.list_children(owner, None).await.unwrap();
        let names: Vec<_> = root.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, ["zeta", "Alpha.txt", "beta_1.txt"]);

        let hits = store.search_by_filename(owner, "alpha").await.unwrap();
        assert_eq!(hits.len(), 1);
        let hits = store.search_by_filename(owner, "_").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "beta_1.txt");
    }
}
