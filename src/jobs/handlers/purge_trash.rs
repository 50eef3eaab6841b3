//! Handles a `purge_trash` job: walks a repository's `.lumilio/trash` tree
//! and permanently deletes entries whose sidecar `deleted_at` is older than
//! `TRASH_RETENTION_DAYS`. Soft-deletes stay recoverable until this runs.

use chrono::Utc;
use serde::Deserialize;
use walkdir::WalkDir;

use super::HandlerContext;
use crate::db::models::{Job, TrashEntry};
use crate::error::AppResult;
use crate::jobs::decode_payload;

#[derive(Debug, Deserialize)]
struct Payload {
    repository_id: String,
    retention_days: i64,
}

pub async fn run(ctx: &HandlerContext, job: &Job) -> AppResult<()> {
    let payload: Payload = decode_payload(job)?;
    run_for(ctx, &payload.repository_id, payload.retention_days).await
}

/// Shared by the job handler and the `purge-trash` CLI subcommand, which
/// runs this synchronously outside the job queue for an operator-triggered
/// one-off pass.
pub async fn run_for(ctx: &HandlerContext, repository_id: &str, retention_days: i64) -> AppResult<usize> {
    let storage = ctx.storage_for(repository_id).await?;
    let trash_root = storage.root().join(".lumilio/trash");
    if !trash_root.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let root = storage.root().to_path_buf();
    let sidecars = tokio::task::spawn_blocking(move || list_sidecars(&trash_root))
        .await
        .map_err(|e| crate::error::AppError::Internal(format!("purge_trash walk task panicked: {e}")))??;

    let mut purged = 0;
    for sidecar in sidecars {
        let bytes = match tokio::fs::read(&sidecar).await {
            Ok(b) => b,
            Err(_) => continue,
        };
        let entry: TrashEntry = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry.deleted_at > cutoff {
            continue;
        }
        let relative_bytes_path = find_sibling_with_any_extension(&sidecar);
        if let Some(bytes_path) = relative_bytes_path {
            if let Ok(rel) = bytes_path.strip_prefix(&root) {
                storage.purge_trash_entry(&rel.to_string_lossy()).await?;
                purged += 1;
            }
        }
    }

    tracing::info!("purged {purged} trash entries for {repository_id}");
    Ok(purged)
}

fn list_sidecars(trash_root: &std::path::Path) -> AppResult<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(trash_root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(entry.path().to_path_buf());
        }
    }
    Ok(out)
}

/// The trash bytes file shares the sidecar's stem but may carry the
/// original extension (or none) — locate it rather than assume.
fn find_sibling_with_any_extension(sidecar: &std::path::Path) -> Option<std::path::PathBuf> {
    let stem = sidecar.file_stem()?;
    let dir = sidecar.parent()?;
    for entry in std::fs::read_dir(dir).ok()? {
        let entry = entry.ok()?;
        let path = entry.path();
        if path == sidecar {
            continue;
        }
        if path.file_stem() == Some(stem) {
            return Some(path);
        }
    }
    None
}
