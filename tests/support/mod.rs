//! Shared harness for the end-to-end tests: a full `AppState` wired against
//! a temp SQLite file and a temp repository directory, matching SPEC_FULL
//! §8's "spin up the full `AppState`... drive the axum router in-process"
//! test tooling note.

use lumilio::config::Config;
use lumilio::jobs::{handlers::dispatch, WorkerSpec};
use lumilio::storage::layout::RepoConfig;
use lumilio::AppState;
use uuid::Uuid;

pub struct Harness {
    pub state: AppState,
    pub repo_id: String,
    pub repo_dir: tempfile::TempDir,
    pub db_dir: tempfile::TempDir,
    /// Keeps the background worker pool's shutdown channel open for the
    /// harness's lifetime; dropping it would let `run_workers` observe a
    /// closed channel and the workers would stop claiming jobs.
    _shutdown_tx: tokio::sync::watch::Sender<bool>,
}

pub async fn setup() -> Harness {
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("test.db");
    let repo_dir = tempfile::tempdir().unwrap();
    let repo_id = Uuid::new_v4().to_string();

    let config = Config {
        bind_addr: "127.0.0.1:0".to_string(),
        database_url: format!("sqlite:{}?mode=rwc", db_path.display()),
        default_storage_root: Some(repo_dir.path().to_string_lossy().to_string()),
        ml_service_addr: None,
        ml_concurrency: 2,
        worker_pool_ingest: 1,
        worker_pool_process: 1,
        worker_pool_thumbnail: 1,
        worker_pool_embedding: 1,
        worker_pool_transcode: 1,
        worker_pool_sync: 1,
        trash_retention_days: 30,
    };

    let state = lumilio::build_state(config).await.unwrap();

    sqlx::query(
        "INSERT INTO repositories (id, root_path, storage_strategy, preserve_filename, duplicate_policy) VALUES (?, ?, 'cas', 0, 'rename')",
    )
    .bind(&repo_id)
    .bind(repo_dir.path().to_string_lossy().to_string())
    .execute(state.ctx.catalog.pool())
    .await
    .unwrap();

    let repo_config = RepoConfig {
        id: repo_id.clone(),
        storage_strategy: lumilio::storage::layout::StorageStrategy::Cas,
        preserve_filename: false,
        duplicate_policy: lumilio::storage::layout::DuplicatePolicy::Rename,
        protected_prefixes: RepoConfig::default_protected_prefixes(),
        trash_days: 30,
    };
    tokio::fs::create_dir_all(repo_dir.path().join(".lumilio")).await.unwrap();
    tokio::fs::write(repo_dir.path().join(".lumilio/repo.conf"), repo_config.render()).await.unwrap();

    // Run the full job-worker pool in the background so tests that enqueue
    // work (the watcher, the reconciler) can observe its effects without
    // each test hand-rolling a claim/dispatch loop.
    let specs = vec![
        WorkerSpec { kind: "ingest_commit", concurrency: 2 },
        WorkerSpec { kind: "process_asset", concurrency: 2 },
        WorkerSpec { kind: "generate_thumbnail", concurrency: 2 },
        WorkerSpec { kind: "compute_embedding", concurrency: 2 },
        WorkerSpec { kind: "transcode_video", concurrency: 2 },
        WorkerSpec { kind: "reconcile_repo", concurrency: 2 },
        WorkerSpec { kind: "purge_trash", concurrency: 2 },
    ];
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker_ctx = state.ctx.clone();
    tokio::spawn(lumilio::jobs::run_workers(
        worker_ctx.jobs.clone(),
        specs,
        move |job, cancel| {
            let ctx = worker_ctx.clone();
            async move { dispatch(&ctx, job, cancel).await }
        },
        shutdown_rx,
    ));

    Harness { state, repo_id, repo_dir, db_dir, _shutdown_tx: shutdown_tx }
}

/// A valid 1x1 transparent GIF, matching SPEC_FULL §8 scenario 1's fixture.
pub const ONE_PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF,
    0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02,
    0x02, 0x44, 0x01, 0x00, 0x3B,
];

pub fn multipart_body(boundary: &str, repository_id: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"repository_id\"\r\n\r\n");
    body.extend_from_slice(repository_id.as_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
