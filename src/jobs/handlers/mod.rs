//! One file per job kind (§6's job-kind list), each a plain async fn over a
//! shared `HandlerContext`. `dispatch` is the single place that maps a
//! claimed `Job`'s `kind` string onto its handler; unknown kinds are
//! discarded per §6 ("unknown kinds are discarded"), matching a reference
//! queue consumer's dispatch-by-kind shape.

pub mod compute_embedding;
pub mod generate_thumbnail;
pub mod ingest_commit;
pub mod process_asset;
pub mod purge_trash;
pub mod reconcile_repo;
pub mod transcode_video;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::db::models::Job;
use crate::error::{AppError, AppResult};
use crate::ingest::IngestCoordinator;
use crate::jobs::{JobOutcome, JobQueue};
use crate::ml::MlClient;
use crate::storage::layout::RepoConfig;
use crate::storage::StorageLayer;

#[derive(Clone)]
pub struct HandlerContext {
    pub catalog: Catalog,
    pub jobs: Arc<JobQueue>,
    pub coordinator: Arc<IngestCoordinator>,
    pub ml: MlClient,
    pub ml_max_models: u32,
    storages: Arc<RwLock<HashMap<String, Arc<StorageLayer>>>>,
}

impl HandlerContext {
    pub fn new(catalog: Catalog, jobs: Arc<JobQueue>, coordinator: Arc<IngestCoordinator>, ml: MlClient, ml_max_models: u32) -> Self {
        HandlerContext { catalog, jobs, coordinator, ml, ml_max_models, storages: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Resolves (and caches) the `StorageLayer` for a repository, reading
    /// its root path from the catalog and its `repo.conf` from disk on
    /// first access. Repositories are operator-registered and effectively
    /// static for the process lifetime, so this cache never needs eviction.
    pub async fn storage_for(&self, repository_id: &str) -> AppResult<Arc<StorageLayer>> {
        if let Some(layer) = self.storages.read().await.get(repository_id) {
            return Ok(layer.clone());
        }

        let repo = sqlx::query_as::<_, crate::db::models::Repository>("SELECT * FROM repositories WHERE id = ?")
            .bind(repository_id)
            .fetch_optional(self.catalog.pool())
            .await?
            .ok_or(AppError::NotFound)?;

        let root = std::path::PathBuf::from(&repo.root_path);
        let conf_text = tokio::fs::read_to_string(root.join(".lumilio/repo.conf"))
            .await
            .map_err(|e| AppError::Fatal(format!("cannot read repo.conf for {repository_id}: {e}")))?;
        let config = RepoConfig::parse(&conf_text)?;

        let layer = Arc::new(StorageLayer::new(root, config));
        self.storages.write().await.insert(repository_id.to_string(), layer.clone());
        Ok(layer)
    }
}

pub async fn dispatch(ctx: &HandlerContext, job: Job, cancel: CancellationToken) -> AppResult<JobOutcome> {
    match job.kind.as_str() {
        "ingest_commit" => ingest_commit::run(ctx, &job).await.map(|_| JobOutcome::Done),
        "process_asset" => process_asset::run(ctx, &job).await.map(|_| JobOutcome::Done),
        "generate_thumbnail" => generate_thumbnail::run(ctx, &job).await.map(|_| JobOutcome::Done),
        "compute_embedding" => compute_embedding::run(ctx, &job).await.map(|_| JobOutcome::Done),
        "transcode_video" => transcode_video::run(ctx, &job, &cancel).await,
        "reconcile_repo" => reconcile_repo::run(ctx, &job, &cancel).await,
        "purge_trash" => purge_trash::run(ctx, &job).await.map(|_| JobOutcome::Done),
        other => {
            tracing::warn!("discarding job {} with unknown kind '{other}'", job.id);
            Ok(JobOutcome::Discarded(format!("unknown job kind '{other}'")))
        }
    }
}
