//! Durable job queue (§4.4). SQLite has no `FOR UPDATE SKIP LOCKED`, so a
//! claim is a single atomic `UPDATE ... WHERE id = (SELECT ...) RETURNING *`
//! — SQLite serializes writers, and the connection pool's `busy_timeout`
//! (see `db::create_pool`) makes concurrent claimers queue instead of
//! erroring, which gets the same "one claimer wins" property SKIP LOCKED
//! gives on Postgres.

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::models::Job;
use crate::error::{AppError, AppResult};

const BASE_BACKOFF_SECS: i64 = 5;
const MAX_BACKOFF_SECS: i64 = 600;

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        JobQueue { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Enqueues a job. When `unique_key` is set and a live (available or
    /// running) job already holds it, this is a no-op coalescing into the
    /// existing job rather than an error — callers that want to know which
    /// happened can compare the returned id against a freshly generated one.
    pub async fn enqueue<P: Serialize>(
        &self,
        kind: &str,
        payload: &P,
        unique_key: Option<&str>,
        max_attempts: i64,
    ) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        let payload_bytes = serde_json::to_vec(payload).map_err(|e| AppError::Internal(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO jobs (id, kind, payload, max_attempts, unique_key) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(kind)
        .bind(&payload_bytes)
        .bind(max_attempts)
        .bind(unique_key)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let existing: (String,) = sqlx::query_as(
                    "SELECT id FROM jobs WHERE unique_key = ? AND state IN ('available', 'running')",
                )
                .bind(unique_key)
                .fetch_one(&self.pool)
                .await?;
                Ok(existing.0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Claims the oldest available-or-retryable job of `kind` whose
    /// `scheduled_at` has passed, atomically flipping it to `running`.
    /// `retryable` jobs are claimable immediately alongside `available`
    /// ones: a cancelled handler leaves its job `retryable` without pushing
    /// `scheduled_at` forward, so it's picked up on the next poll rather than
    /// waiting out a backoff it never earned.
    pub(crate) async fn claim(&self, kind: &str) -> AppResult<Option<Job>> {
        let now = Utc::now();
        let job = sqlx::query_as::<_, Job>(
            "UPDATE jobs SET state = 'running'
             WHERE id = (
                SELECT id FROM jobs
                WHERE kind = ? AND state IN ('available', 'retryable') AND scheduled_at <= ?
                ORDER BY scheduled_at ASC
                LIMIT 1
             )
             RETURNING *",
        )
        .bind(kind)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    /// Marks a job `discarded` without touching `attempt`, for handlers that
    /// recognize the job can never succeed (e.g. an unknown `kind`) rather
    /// than failing it into the normal retry/backoff path.
    pub async fn discard(&self, job_id: &str, reason: &str) -> AppResult<()> {
        sqlx::query("UPDATE jobs SET state = 'discarded', last_error = ? WHERE id = ?")
            .bind(reason)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns a cooperatively-cancelled job to `retryable` immediately,
    /// without incrementing `attempt` or scheduling a backoff delay — a
    /// cancellation is the worker shutting down, not the handler failing.
    pub async fn cancel(&self, job_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE jobs SET state = 'retryable' WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn complete(&self, job_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE jobs SET state = 'completed' WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a failure. Retries with exponential backoff plus jitter while
    /// attempts remain, otherwise discards the job permanently.
    pub async fn fail(&self, job: &Job, error: &str) -> AppResult<()> {
        let attempt = job.attempt + 1;
        if attempt >= job.max_attempts {
            sqlx::query("UPDATE jobs SET state = 'discarded', attempt = ?, last_error = ? WHERE id = ?")
                .bind(attempt)
                .bind(error)
                .bind(&job.id)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        let delay = backoff_with_jitter(attempt);
        let scheduled_at = Utc::now() + chrono::Duration::seconds(delay);
        sqlx::query(
            "UPDATE jobs SET state = 'available', attempt = ?, last_error = ?, scheduled_at = ? WHERE id = ?",
        )
        .bind(attempt)
        .bind(error)
        .bind(scheduled_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn checkpoint_get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT blob FROM checkpoints WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(blob,)| blob))
    }

    pub async fn checkpoint_set(&self, key: &str, blob: &[u8]) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO checkpoints (key, blob, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(blob)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Deserializes a job's JSON payload into `P`.
pub fn decode_payload<P: DeserializeOwned>(job: &Job) -> AppResult<P> {
    serde_json::from_slice(&job.payload).map_err(|e| AppError::Internal(format!("bad job payload: {e}")))
}

fn backoff_with_jitter(attempt: i64) -> i64 {
    let exp = BASE_BACKOFF_SECS.saturating_mul(1i64.checked_shl(attempt.min(10) as u32).unwrap_or(i64::MAX));
    let capped = exp.min(MAX_BACKOFF_SECS);
    let jitter = rand::rng().random_range(0..=(capped / 4).max(1));
    capped + jitter
}

/// A named worker kind: the queue `kind` string it pulls, and how many of
/// its jobs may run concurrently.
pub struct WorkerSpec {
    pub kind: &'static str,
    pub concurrency: usize,
}

/// What a handler did with its claimed job, as distinct from the bare
/// `AppResult<()>` a single-shot handler returns: `dispatch` wraps those as
/// `Done`, and reserves `Discarded`/`Cancelled` for handlers that need to
/// tell `run_workers` apart from ordinary success or failure.
#[derive(Debug)]
pub enum JobOutcome {
    /// The job ran to completion.
    Done,
    /// The job can never succeed (e.g. an unrecognized `kind`); terminal,
    /// does not count against `max_attempts`.
    Discarded(String),
    /// The job was cooperatively cancelled mid-run, typically by a shutdown
    /// signal; returned to `retryable` without incrementing `attempt`.
    Cancelled,
}

/// Runs one polling loop per `WorkerSpec`, each bounded by its own
/// `Semaphore` so a burst of cheap jobs can't starve other kinds out of
/// worker slots. `handle` dispatches a claimed job to the right handler
/// function, given a `CancellationToken` that flips when `shutdown` fires;
/// long-running handlers poll it at stage boundaries and return
/// `Ok(JobOutcome::Cancelled)` rather than being aborted mid-write.
pub async fn run_workers<F, Fut>(
    queue: Arc<JobQueue>,
    specs: Vec<WorkerSpec>,
    handle: F,
    shutdown: tokio::sync::watch::Receiver<bool>,
) where
    F: Fn(Job, CancellationToken) -> Fut + Send + Sync + 'static + Clone,
    Fut: std::future::Future<Output = AppResult<JobOutcome>> + Send + 'static,
{
    let mut tasks = Vec::new();
    for spec in specs {
        let queue = queue.clone();
        let handle = handle.clone();
        let mut shutdown = shutdown.clone();
        let semaphore = Arc::new(Semaphore::new(spec.concurrency));
        let kind = spec.kind;

        tasks.push(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    return;
                }
                match queue.claim(kind).await {
                    Ok(Some(job)) => {
                        let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
                        let queue = queue.clone();
                        let handle = handle.clone();
                        let mut shutdown_for_cancel = shutdown.clone();
                        tokio::spawn(async move {
                            let job_id = job.id.clone();
                            let cancel = CancellationToken::new();
                            let canceller = {
                                let cancel = cancel.clone();
                                tokio::spawn(async move {
                                    let _ = shutdown_for_cancel.wait_for(|stop| *stop).await;
                                    cancel.cancel();
                                })
                            };
                            let result = handle(job.clone(), cancel).await;
                            canceller.abort();
                            match result {
                                Ok(JobOutcome::Done) => {
                                    if let Err(e) = queue.complete(&job_id).await {
                                        tracing::error!("failed to mark job {job_id} completed: {e}");
                                    }
                                }
                                Ok(JobOutcome::Discarded(reason)) => {
                                    if let Err(e) = queue.discard(&job_id, &reason).await {
                                        tracing::error!("failed to mark job {job_id} discarded: {e}");
                                    }
                                }
                                Ok(JobOutcome::Cancelled) => {
                                    if let Err(e) = queue.cancel(&job_id).await {
                                        tracing::error!("failed to mark job {job_id} retryable after cancellation: {e}");
                                    }
                                }
                                Err(e) => {
                                    if let Err(e2) = queue.fail(&job, &e.to_string()).await {
                                        tracing::error!("failed to mark job {job_id} failed: {e2}");
                                    }
                                }
                            }
                            drop(permit);
                        });
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                    Err(e) => {
                        tracing::error!("job claim failed for kind {kind}: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }));
    }

    join_all_tasks(tasks).await;
}

async fn join_all_tasks(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for task in tasks {
        let _ = task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(include_str!("../../migrations/0001_init.sql"))
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn enqueue_and_claim_round_trip() {
        let pool = setup_pool().await;
        let queue = JobQueue::new(pool);
        queue.enqueue("process_asset", &serde_json::json!({"asset_id": "a1"}), None, 5).await.unwrap();

        let job = queue.claim("process_asset").await.unwrap().unwrap();
        assert_eq!(job.state, "running");
        assert!(queue.claim("process_asset").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unique_key_coalesces_live_jobs() {
        let pool = setup_pool().await;
        let queue = JobQueue::new(pool);
        let first = queue
            .enqueue("reconcile_repo", &serde_json::json!({}), Some("repo-1"), 5)
            .await
            .unwrap();
        let second = queue
            .enqueue("reconcile_repo", &serde_json::json!({}), Some("repo-1"), 5)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failed_job_is_retried_until_max_attempts_then_discarded() {
        let pool = setup_pool().await;
        let queue = JobQueue::new(pool);
        queue.enqueue("process_asset", &serde_json::json!({}), None, 2).await.unwrap();

        let job = queue.claim("process_asset").await.unwrap().unwrap();
        queue.fail(&job, "boom").await.unwrap();

        let row: (String, i64) = sqlx::query_as("SELECT state, attempt FROM jobs WHERE id = ?")
            .bind(&job.id)
            .fetch_one(queue.pool())
            .await
            .unwrap();
        assert_eq!(row.0, "available");
        assert_eq!(row.1, 1);

        // scheduled_at was pushed into the future by backoff, so a second
        // attempt has to be forced forward for this test to claim it again.
        sqlx::query("UPDATE jobs SET scheduled_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(&job.id)
            .execute(queue.pool())
            .await
            .unwrap();
        let job2 = queue.claim("process_asset").await.unwrap().unwrap();
        queue.fail(&job2, "boom again").await.unwrap();

        let row: (String,) = sqlx::query_as("SELECT state FROM jobs WHERE id = ?")
            .bind(&job.id)
            .fetch_one(queue.pool())
            .await
            .unwrap();
        assert_eq!(row.0, "discarded");
    }

    #[tokio::test]
    async fn checkpoint_roundtrips() {
        let pool = setup_pool().await;
        let queue = JobQueue::new(pool);
        queue.checkpoint_set("reconcile:repo-1", b"cursor-42").await.unwrap();
        let blob = queue.checkpoint_get("reconcile:repo-1").await.unwrap();
        assert_eq!(blob, Some(b"cursor-42".to_vec()));
    }
}
