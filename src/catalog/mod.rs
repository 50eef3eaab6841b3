//! Store over the schema in `migrations/0001_init.sql`. Writes that must stay
//! consistent with an already-applied filesystem side effect (commit, trash)
//! don't use a database transaction — SQLite can't undo the filesystem half
//! of that pair anyway. Instead the caller (`ingest::IngestCoordinator`)
//! hand-rolls a compensator: perform the filesystem step, attempt the catalog
//! write, and on failure undo the filesystem step instead of the row.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{Asset, Embedding, FileRecord, FileRecordState, SearchResult, Thumbnail};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    pub fn new(pool: SqlitePool) -> Self {
        Catalog { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_by_hash(&self, repository_id: &str, hash: &str) -> AppResult<Option<Asset>> {
        let asset = sqlx::query_as::<_, Asset>(
            "SELECT * FROM assets WHERE repository_id = ? AND hash = ? AND is_deleted = 0",
        )
        .bind(repository_id)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(asset)
    }

    pub async fn find_by_storage_path(&self, repository_id: &str, storage_path: &str) -> AppResult<Option<Asset>> {
        let asset = sqlx::query_as::<_, Asset>(
            "SELECT * FROM assets WHERE repository_id = ? AND storage_path = ? AND is_deleted = 0",
        )
        .bind(repository_id)
        .bind(storage_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(asset)
    }

    pub async fn get(&self, asset_id: &str) -> AppResult<Asset> {
        sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE id = ? AND is_deleted = 0")
            .bind(asset_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Inserts a new asset row. The partial unique indexes on
    /// `(repository_id, hash)` and `(repository_id, storage_path)` (live rows
    /// only) turn a concurrent duplicate insert into a constraint violation,
    /// which this maps onto `AppError::Conflict` so the ingest coordinator's
    /// compensator can trash the just-committed bytes.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_asset(
        &self,
        repository_id: &str,
        hash: &str,
        mime_type: &str,
        asset_type: &str,
        original_filename: &str,
        storage_path: &str,
        size: i64,
        taken_time: Option<chrono::DateTime<Utc>>,
    ) -> AppResult<Asset> {
        let id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT INTO assets (id, repository_id, hash, mime_type, asset_type, original_filename, storage_path, size, taken_time, status_state, specific_metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', '{}')",
        )
        .bind(&id)
        .bind(repository_id)
        .bind(hash)
        .bind(mime_type)
        .bind(asset_type)
        .bind(original_filename)
        .bind(storage_path)
        .bind(size)
        .bind(taken_time)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => self.get(&id).await,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::Conflict("asset already exists for this hash or path".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update_status(&self, asset_id: &str, state: &str, reason: Option<&str>) -> AppResult<()> {
        sqlx::query("UPDATE assets SET status_state = ?, status_reason = ? WHERE id = ?")
            .bind(state)
            .bind(reason)
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_metadata(&self, asset_id: &str, specific_metadata: &str, taken_time: Option<chrono::DateTime<Utc>>, duration: Option<f64>) -> AppResult<()> {
        sqlx::query("UPDATE assets SET specific_metadata = ?, taken_time = COALESCE(?, taken_time), duration = COALESCE(?, duration) WHERE id = ?")
            .bind(specific_metadata)
            .bind(taken_time)
            .bind(duration)
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, asset_id: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE assets SET is_deleted = 1 WHERE id = ?")
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn upsert_thumbnail(&self, thumbnail: &Thumbnail) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO thumbnails (asset_id, size, path, width, height) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(asset_id, size) DO UPDATE SET path = excluded.path, width = excluded.width, height = excluded.height",
        )
        .bind(&thumbnail.asset_id)
        .bind(&thumbnail.size)
        .bind(&thumbnail.path)
        .bind(thumbnail.width)
        .bind(thumbnail.height)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_embedding(&self, asset_id: &str, model_id: &str, vector: &[f32]) -> AppResult<()> {
        let packed = pack_vector(vector);
        sqlx::query(
            "INSERT INTO embeddings (asset_id, model_id, vector) VALUES (?, ?, ?)
             ON CONFLICT(asset_id, model_id) DO UPDATE SET vector = excluded.vector",
        )
        .bind(asset_id)
        .bind(model_id)
        .bind(packed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Brute-force cosine-similarity nearest-neighbor scan. No crate in this
    /// codebase's lineage demonstrates a vector index; at repository scale a
    /// full scan over unpacked BLOBs is the honest tradeoff (see DESIGN.md).
    pub async fn find_nearest(&self, model_id: &str, query: &[f32], limit: usize) -> AppResult<Vec<(String, f32)>> {
        let rows = sqlx::query_as::<_, Embedding>("SELECT * FROM embeddings WHERE model_id = ?")
            .bind(model_id)
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(String, f32)> = rows
            .iter()
            .map(|row| (row.asset_id.clone(), cosine_similarity(query, &unpack_vector(&row.vector))))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Filename/metadata full-text search against the `assets_fts` virtual
    /// table, joined back on rowid for the canonical asset id.
    pub async fn search_by_filename(&self, repository_id: &str, query: &str, limit: u32) -> AppResult<Vec<SearchResult>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT a.id, a.original_filename, snippet(assets_fts, 0, '[', ']', '...', 8)
             FROM assets_fts JOIN assets a ON a.rowid = assets_fts.rowid
             WHERE assets_fts MATCH ? AND a.repository_id = ? AND a.is_deleted = 0
             LIMIT ?",
        )
        .bind(query)
        .bind(repository_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(asset_id, original_filename, snippet)| SearchResult { asset_id, original_filename, snippet })
            .collect())
    }

    pub async fn upsert_file_record(&self, record: &FileRecord) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO file_records (repository_id, relative_path, last_hash, last_mtime, size, state)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(repository_id, relative_path) DO UPDATE SET
                last_hash = excluded.last_hash, last_mtime = excluded.last_mtime,
                size = excluded.size, state = excluded.state",
        )
        .bind(&record.repository_id)
        .bind(&record.relative_path)
        .bind(&record.last_hash)
        .bind(record.last_mtime)
        .bind(record.size)
        .bind(&record.state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_file_record_missing(&self, repository_id: &str, relative_path: &str) -> AppResult<()> {
        sqlx::query("UPDATE file_records SET state = ? WHERE repository_id = ? AND relative_path = ?")
            .bind(FileRecordState::Missing.as_str())
            .bind(repository_id)
            .bind(relative_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_file_records(&self, repository_id: &str) -> AppResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecord>(
            "SELECT * FROM file_records WHERE repository_id = ? AND state != 'missing'",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

pub fn pack_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn unpack_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for i in 0..len {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_packing_roundtrips() {
        let original = vec![1.0f32, -2.5, 0.0, 3.75];
        let packed = pack_vector(&original);
        assert_eq!(unpack_vector(&packed), original);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(include_str!("../../migrations/0001_init.sql"))
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    async fn seed_repository(pool: &SqlitePool) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO repositories (id, root_path, storage_strategy, preserve_filename, duplicate_policy) VALUES (?, ?, 'cas', 0, 'rename')",
        )
        .bind(&id)
        .bind(format!("/tmp/{id}"))
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn duplicate_hash_insert_is_rejected_as_conflict() {
        let pool = setup_pool().await;
        let repo_id = seed_repository(&pool).await;
        let catalog = Catalog::new(pool);

        catalog
            .create_asset(&repo_id, "hash1", "image/jpeg", "photo", "a.jpg", "inbox/ha/sh/1/hash1.jpg", 100, None)
            .await
            .unwrap();

        let result = catalog
            .create_asset(&repo_id, "hash1", "image/jpeg", "photo", "b.jpg", "inbox/ha/sh/1/hash1-dup.jpg", 100, None)
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn soft_deleted_asset_releases_its_hash() {
        let pool = setup_pool().await;
        let repo_id = seed_repository(&pool).await;
        let catalog = Catalog::new(pool);

        let asset = catalog
            .create_asset(&repo_id, "hash2", "image/jpeg", "photo", "a.jpg", "inbox/a/b/c/hash2.jpg", 100, None)
            .await
            .unwrap();
        catalog.soft_delete(&asset.id).await.unwrap();

        let recreated = catalog
            .create_asset(&repo_id, "hash2", "image/jpeg", "photo", "a.jpg", "inbox/a/b/c/hash2.jpg", 100, None)
            .await;
        assert!(recreated.is_ok());
    }

    #[tokio::test]
    async fn find_nearest_orders_by_similarity() {
        let pool = setup_pool().await;
        let repo_id = seed_repository(&pool).await;
        let catalog = Catalog::new(pool);

        let near = catalog
            .create_asset(&repo_id, "hash3", "image/jpeg", "photo", "a.jpg", "inbox/a/b/c/hash3.jpg", 100, None)
            .await
            .unwrap();
        let far = catalog
            .create_asset(&repo_id, "hash4", "image/jpeg", "photo", "b.jpg", "inbox/a/b/c/hash4.jpg", 100, None)
            .await
            .unwrap();

        catalog.upsert_embedding(&near.id, "m1", &[1.0, 0.0, 0.0]).await.unwrap();
        catalog.upsert_embedding(&far.id, "m1", &[0.0, 1.0, 0.0]).await.unwrap();

        let results = catalog.find_nearest("m1", &[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].0, near.id);
    }
}
