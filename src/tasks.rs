//! Background task runner: the realtime watcher is spawned once per
//! repository at startup; the periodic reconciler and trash purge are
//! enqueued as ordinary jobs on an interval, so they get the same
//! retry/backoff/worker-pool treatment as any other job kind rather than
//! running as a bespoke loop the way pawtal's maintenance loop did.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::Config;
use crate::db::models::Repository;
use crate::jobs::handlers::HandlerContext;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(300);
const TRASH_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawns the watcher for every registered repository and the two
/// interval-driven enqueue loops. Returns the `notify` watcher handles —
/// the caller must keep them alive for the process lifetime; dropping one
/// stops that repository's realtime pickup.
pub async fn spawn_background_tasks(ctx: Arc<HandlerContext>, config: Config) -> Vec<notify::RecommendedWatcher> {
    let repos = match sqlx::query_as::<_, Repository>("SELECT * FROM repositories").fetch_all(ctx.catalog.pool()).await {
        Ok(repos) => repos,
        Err(e) => {
            tracing::error!("failed to list repositories for background tasks: {e}");
            Vec::new()
        }
    };

    let mut watchers = Vec::new();
    for repo in &repos {
        match ctx.storage_for(&repo.id).await {
            Ok(storage) => match crate::sync::watcher::spawn(storage, ctx.jobs.clone(), repo.id.clone()) {
                Ok(watcher) => watchers.push(watcher),
                Err(e) => tracing::error!("failed to start watcher for repository {}: {e}", repo.id),
            },
            Err(e) => tracing::error!("failed to resolve storage for repository {}: {e}", repo.id),
        }
    }

    spawn_reconcile_loop(ctx.clone());
    spawn_trash_purge_loop(ctx, config.trash_retention_days);

    watchers
}

fn spawn_reconcile_loop(ctx: Arc<HandlerContext>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RECONCILE_INTERVAL);
        loop {
            interval.tick().await;
            let repos = match sqlx::query_as::<_, Repository>("SELECT * FROM repositories").fetch_all(ctx.catalog.pool()).await {
                Ok(repos) => repos,
                Err(e) => {
                    tracing::error!("reconcile loop: failed to list repositories: {e}");
                    continue;
                }
            };
            for repo in repos {
                let unique_key = format!("reconcile_repo:{}", repo.id);
                if let Err(e) = ctx.jobs.enqueue("reconcile_repo", &json!({ "repository_id": repo.id }), Some(&unique_key), 3).await {
                    tracing::error!("failed to enqueue reconcile_repo for {}: {e}", repo.id);
                }
            }
        }
    });
}

fn spawn_trash_purge_loop(ctx: Arc<HandlerContext>, retention_days: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TRASH_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let repos = match sqlx::query_as::<_, Repository>("SELECT * FROM repositories").fetch_all(ctx.catalog.pool()).await {
                Ok(repos) => repos,
                Err(e) => {
                    tracing::error!("trash purge loop: failed to list repositories: {e}");
                    continue;
                }
            };
            for repo in repos {
                let unique_key = format!("purge_trash:{}", repo.id);
                let payload = json!({ "repository_id": repo.id, "retention_days": retention_days });
                if let Err(e) = ctx.jobs.enqueue("purge_trash", &payload, Some(&unique_key), 3).await {
                    tracing::error!("failed to enqueue purge_trash for {}: {e}", repo.id);
                }
            }
        }
    });
}
