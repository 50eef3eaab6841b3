use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Process-wide configuration loaded from environment variables via `envy`.
///
/// All fields map directly to environment variable names (uppercased by
/// envy). Provide defaults via `.env` for local development; override via
/// real env vars in production / Docker.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to, e.g. `0.0.0.0:8080`.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite connection string, e.g. `sqlite:data/lumilio.db?mode=rwc`.
    pub database_url: String,

    /// Filesystem path used as the storage root for repositories that don't
    /// specify their own root explicitly (e.g. `reconcile`/`serve` invoked
    /// without `--repo`).
    pub default_storage_root: Option<String>,

    /// Base URL of the external ML inference service. Absent disables
    /// descriptor computation entirely; the processor pipeline degrades to
    /// "no embeddings" rather than failing assets.
    pub ml_service_addr: Option<String>,

    /// Maximum number of concurrent in-flight requests to the ML service.
    #[serde(default = "default_ml_concurrency")]
    pub ml_concurrency: usize,

    /// Bounded worker-pool size per job kind. A flood of one kind cannot
    /// starve another because each kind claims from its own semaphore.
    #[serde(default = "default_pool_size")]
    pub worker_pool_ingest: usize,
    #[serde(default = "default_pool_size")]
    pub worker_pool_process: usize,
    #[serde(default = "default_pool_size")]
    pub worker_pool_thumbnail: usize,
    #[serde(default = "default_small_pool_size")]
    pub worker_pool_embedding: usize,
    #[serde(default = "default_small_pool_size")]
    pub worker_pool_transcode: usize,
    #[serde(default = "default_pool_size")]
    pub worker_pool_sync: usize,

    /// Default trash retention window in days, overridable per-repository by
    /// `repo.conf`'s `retention.trash_days`.
    #[serde(default = "default_trash_retention_days")]
    pub trash_retention_days: i64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_ml_concurrency() -> usize {
    4
}

fn default_pool_size() -> usize {
    4
}

fn default_small_pool_size() -> usize {
    2
}

fn default_trash_retention_days() -> i64 {
    30
}

impl Config {
    /// Load configuration from the current process environment.
    ///
    /// A missing or malformed required variable is a `Fatal` error (§7),
    /// mapping onto the CLI's exit code `2` rather than a raw panic.
    pub fn from_env() -> AppResult<Self> {
        envy::from_env::<Config>().map_err(|err| {
            AppError::Fatal(format!(
                "configuration error: {err} (check that all required environment variables are set, see .env.example)"
            ))
        })
    }
}
