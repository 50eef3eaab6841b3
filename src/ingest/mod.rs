//! Ingest coordinator (§4.7): receives a staged path, claims an asset
//! identity, and decides the single outcome — dedup hit, new asset, or
//! failure. Grounded on the teacher's stage→write→process→insert
//! sequencing, generalized to the spec's hash-first/dedup/commit/compensate
//! algorithm.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::catalog::Catalog;
use crate::error::{AppError, AppResult};
use crate::jobs::JobQueue;
use crate::storage::StorageLayer;

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Created { asset_id: String, task_id: String },
    Deduplicated { asset_id: String },
}

/// Keyed lock enforcing "one in-flight commit per `(repo_id, hash)`" (§4.7).
#[derive(Default)]
struct HashLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HashLocks {
    async fn lock_for(&self, repo_id: &str, hash: &str) -> Arc<Mutex<()>> {
        let key = format!("{repo_id}:{hash}");
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

pub struct IngestCoordinator {
    catalog: Catalog,
    jobs: Arc<JobQueue>,
    hash_locks: HashLocks,
}

impl IngestCoordinator {
    pub fn new(catalog: Catalog, jobs: Arc<JobQueue>) -> Self {
        IngestCoordinator { catalog, jobs, hash_locks: HashLocks::default() }
    }

    /// Runs the full ingest algorithm against an already-staged file.
    /// `client_hash`, when present, is checked against the recomputed hash
    /// and rejected as `Policy` on mismatch **before** any commit — the
    /// resolution of Open Question #1 (always trust the server recompute).
    pub async fn ingest(
        &self,
        storage: &StorageLayer,
        repo_id: &str,
        staging_path: &Path,
        original_name: &str,
        mime: &str,
        client_hash: Option<&str>,
    ) -> AppResult<IngestOutcome> {
        let bytes = tokio::fs::read(staging_path).await?;
        let hash = format!("{:x}", Sha256::digest(&bytes));

        if let Some(supplied) = client_hash {
            if !supplied.eq_ignore_ascii_case(&hash) {
                let _ = storage.move_to_failed(staging_path, original_name, "content-hash-mismatch").await;
                return Err(AppError::Policy("content-hash-mismatch".to_string()));
            }
        }

        let lock = self.hash_locks.lock_for(repo_id, &hash).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.catalog.find_by_hash(repo_id, &hash).await? {
            let _ = tokio::fs::remove_file(staging_path).await;
            return Ok(IngestOutcome::Deduplicated { asset_id: existing.id });
        }

        let asset_type = asset_type_for_mime(mime);
        let relative_path = match storage.commit(staging_path, &hash, original_name, mime).await {
            Ok(path) => path,
            Err(e) => {
                let _ = storage.move_to_failed(staging_path, original_name, &e.to_string()).await;
                return Err(e);
            }
        };

        let size = bytes.len() as i64;
        match self
            .catalog
            .create_asset(repo_id, &hash, mime, asset_type, original_name, &relative_path, size, None)
            .await
        {
            Ok(asset) => {
                let unique_key = format!("process_asset:{}", asset.id);
                let task_id = self
                    .jobs
                    .enqueue("process_asset", &json!({ "asset_id": asset.id }), Some(&unique_key), 5)
                    .await?;
                Ok(IngestOutcome::Created { asset_id: asset.id, task_id })
            }
            // A concurrent writer (e.g. the reconciler) beat this commit to
            // the catalog row despite the per-hash lock — the bytes are
            // already on disk at `relative_path` with no referencing row,
            // so the compensator trashes them as an orphan commit.
            Err(AppError::Conflict(_)) => {
                let _ = storage.move_to_trash("orphan", &relative_path, "orphan-commit").await;
                let existing = self
                    .catalog
                    .find_by_hash(repo_id, &hash)
                    .await?
                    .ok_or_else(|| AppError::Internal("dedup conflict without a matching row".to_string()))?;
                Ok(IngestOutcome::Deduplicated { asset_id: existing.id })
            }
            Err(e) => {
                let _ = storage.move_to_trash("orphan", &relative_path, "orphan-commit").await;
                Err(e)
            }
        }
    }

    /// Registers a file the watcher or reconciler found already sitting at
    /// `relative_path` in a user-managed area (§4.5/§8 scenario 3): unlike
    /// `ingest`, this never calls `storage.commit` — the bytes stay exactly
    /// where the user put them, and `storage_path` is `relative_path`
    /// verbatim. Still goes through the per-hash lock and dedup check, so a
    /// file that's byte-identical to something already ingested doesn't get
    /// a second row.
    pub async fn register_existing(
        &self,
        repo_id: &str,
        relative_path: &str,
        original_name: &str,
        mime: &str,
        hash: &str,
        size: i64,
    ) -> AppResult<IngestOutcome> {
        let lock = self.hash_locks.lock_for(repo_id, hash).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.catalog.find_by_hash(repo_id, hash).await? {
            return Ok(IngestOutcome::Deduplicated { asset_id: existing.id });
        }

        // A previous asset at this exact path was soft-deleted (the
        // reconciler's missing-file branch) and the path has since been
        // reused for different bytes — nothing left to reconcile against.
        if let Some(stale) = self.catalog.find_by_storage_path(repo_id, relative_path).await? {
            if stale.hash != hash {
                self.catalog.soft_delete(&stale.id).await?;
            }
        }

        let asset_type = asset_type_for_mime(mime);
        match self
            .catalog
            .create_asset(repo_id, hash, mime, asset_type, original_name, relative_path, size, None)
            .await
        {
            Ok(asset) => {
                let unique_key = format!("process_asset:{}", asset.id);
                let task_id = self
                    .jobs
                    .enqueue("process_asset", &json!({ "asset_id": asset.id }), Some(&unique_key), 5)
                    .await?;
                Ok(IngestOutcome::Created { asset_id: asset.id, task_id })
            }
            Err(AppError::Conflict(_)) => {
                let existing = self
                    .catalog
                    .find_by_hash(repo_id, hash)
                    .await?
                    .ok_or_else(|| AppError::Internal("dedup conflict without a matching row".to_string()))?;
                Ok(IngestOutcome::Deduplicated { asset_id: existing.id })
            }
            Err(e) => Err(e),
        }
    }
}

fn asset_type_for_mime(mime: &str) -> &'static str {
    if mime.starts_with("image/") {
        "photo"
    } else if mime.starts_with("video/") {
        "video"
    } else if mime.starts_with("audio/") {
        "audio"
    } else {
        "document"
    }
}
