//! Library surface for the asset-ingestion/repository-sync server. `main.rs`
//! is a thin `clap` dispatcher over the entry points defined here, matching
//! pawtal's own split between a binary that wires things up and a crate
//! that holds the actual logic.

pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod ml;
pub mod processor;
pub mod raw;
pub mod storage;
pub mod sync;
pub mod tasks;

use std::sync::Arc;

use config::Config;
use error::{AppError, AppResult};
use jobs::handlers::HandlerContext;
use jobs::{JobQueue, WorkerSpec};
use ml::MlClient;

/// Shared application state passed to every HTTP handler via axum's `State`
/// extractor, and reused by the job workers' `HandlerContext`.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<HandlerContext>,
    pub config: Config,
}

/// Builds the catalog, job queue, ML client, and handler context from
/// `config`. Shared by `serve`, `reconcile_once`, `purge_trash_once`, and
/// `verify`.
pub async fn build_state(config: Config) -> AppResult<AppState> {
    let pool = db::create_pool(&config.database_url).await?;
    let catalog = catalog::Catalog::new(pool.clone());
    let jobs = Arc::new(JobQueue::new(pool));
    let coordinator = Arc::new(ingest::IngestCoordinator::new(catalog.clone(), jobs.clone()));
    let ml = MlClient::new(config.ml_service_addr.clone(), config.ml_concurrency);
    let ctx = Arc::new(HandlerContext::new(catalog, jobs, coordinator, ml, 4));

    Ok(AppState { ctx, config })
}

/// Runs the HTTP server plus background watchers/reconciler/worker pools
/// until the process is killed.
pub async fn serve(config: Config) -> AppResult<()> {
    let state = build_state(config.clone()).await?;

    // Keep the watcher handles alive for the lifetime of `serve` — dropping
    // one stops that repository's realtime pickup.
    let _watchers = tasks::spawn_background_tasks(state.ctx.clone(), config.clone()).await;

    let specs = vec![
        WorkerSpec { kind: "ingest_commit", concurrency: config.worker_pool_ingest },
        WorkerSpec { kind: "process_asset", concurrency: config.worker_pool_process },
        WorkerSpec { kind: "generate_thumbnail", concurrency: config.worker_pool_thumbnail },
        WorkerSpec { kind: "compute_embedding", concurrency: config.worker_pool_embedding },
        WorkerSpec { kind: "transcode_video", concurrency: config.worker_pool_transcode },
        WorkerSpec { kind: "reconcile_repo", concurrency: config.worker_pool_sync },
        WorkerSpec { kind: "purge_trash", concurrency: config.worker_pool_sync },
    ];

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker_ctx = state.ctx.clone();
    tokio::spawn(jobs::run_workers(
        worker_ctx.jobs.clone(),
        specs,
        move |job, cancel| {
            let ctx = worker_ctx.clone();
            async move { jobs::handlers::dispatch(&ctx, job, cancel).await }
        },
        shutdown_rx,
    ));

    let router = api::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr)
        .await
        .map_err(|e| AppError::Fatal(format!("failed to bind {}: {e}", state.config.bind_addr)))?;

    tracing::info!("listening on {}", state.config.bind_addr);
    axum::serve(listener, router).await.map_err(|e| AppError::Fatal(format!("server error: {e}")))?;
    Ok(())
}

/// Runs one reconciliation pass for `repository_id` and returns.
pub async fn reconcile_once(config: Config, repository_id: &str) -> AppResult<()> {
    let state = build_state(config).await?;
    let storage = state.ctx.storage_for(repository_id).await?;
    let cancel = tokio_util::sync::CancellationToken::new();
    let summary = sync::reconciler::run_once(&storage, &state.ctx.catalog, &state.ctx.jobs, repository_id, &cancel).await?;
    tracing::info!(
        "reconciled {repository_id}: {} new, {} changed, {} missing",
        summary.new,
        summary.changed,
        summary.missing
    );
    Ok(())
}

/// Purges trash entries older than the repository's retention window for
/// `repository_id` and returns.
pub async fn purge_trash_once(config: Config, repository_id: &str) -> AppResult<()> {
    let state = build_state(config).await?;
    let retention_days = state.config.trash_retention_days;
    let purged = jobs::handlers::purge_trash::run_for(&state.ctx, repository_id, retention_days).await?;
    tracing::info!("purged {purged} trash entries for {repository_id}");
    Ok(())
}

/// Caps how many assets a single `verify` run recomputes hashes for, per
/// §6's "recomputes hashes for a sampled subset" wording.
const VERIFY_SAMPLE_SIZE: i64 = 500;

/// Cross-checks a sampled subset of live (non-deleted) assets' catalog rows
/// against the bytes actually on disk: missing files and hash divergence are
/// both reported. Returns `Err` if any finding surfaces.
pub async fn verify(config: Config, repository_id: &str) -> AppResult<()> {
    use sha2::{Digest, Sha256};

    let state = build_state(config).await?;
    let storage = state.ctx.storage_for(repository_id).await?;

    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT id, storage_path, hash FROM assets WHERE repository_id = ? AND is_deleted = 0 \
         ORDER BY upload_time DESC LIMIT ?",
    )
    .bind(repository_id)
    .bind(VERIFY_SAMPLE_SIZE)
    .fetch_all(state.ctx.catalog.pool())
    .await?;

    let mut missing = 0;
    let mut diverged = 0;
    for (asset_id, storage_path, expected_hash) in &rows {
        match storage.open(storage_path).await {
            Err(_) => {
                tracing::warn!("asset {asset_id} is missing its committed bytes at {storage_path}");
                missing += 1;
            }
            Ok(bytes) => {
                let actual_hash = format!("{:x}", Sha256::digest(&bytes));
                if &actual_hash != expected_hash {
                    tracing::warn!("asset {asset_id} hash diverged: catalog={expected_hash} disk={actual_hash}");
                    diverged += 1;
                }
            }
        }
    }

    tracing::info!(
        "verified {} assets for {repository_id}: {missing} missing, {diverged} diverged",
        rows.len()
    );
    if missing > 0 || diverged > 0 {
        return Err(AppError::Integrity(format!("{missing} missing, {diverged} diverged asset(s)")));
    }
    Ok(())
}
