//! Realtime filesystem watcher (§4.5 tier 1). `notify` delivers raw OS
//! events; this module debounces them per-path with a short async delay
//! before enqueuing an `ingest_commit` job for the settled path, so a file
//! still being written doesn't get ingested mid-write. Grounded on the
//! teacher pack's dependency on `notify` (present only in the `ferrex`
//! example's `Cargo.toml`, not exercised in its source — this module is the
//! from-scratch generalization of that dependency choice to a watch+debounce
//! loop).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex};

use crate::error::{AppError, AppResult};
use crate::jobs::JobQueue;
use crate::storage::StorageLayer;

const DEBOUNCE: Duration = Duration::from_millis(800);

/// Spawns a `notify` watcher over `storage`'s root and a debounce task that
/// feeds settled paths into the ingest coordinator. Returns the
/// `RecommendedWatcher` handle — dropping it stops the watch.
pub fn spawn(storage: Arc<StorageLayer>, jobs: Arc<JobQueue>, repository_id: String) -> AppResult<RecommendedWatcher> {
    let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !is_relevant(&event.kind) {
                return;
            }
            for path in event.paths {
                let _ = tx.send(path);
            }
        }
        Err(e) => tracing::warn!("filesystem watch error: {e}"),
    })
    .map_err(|e| AppError::Fatal(format!("failed to start filesystem watcher: {e}")))?;

    watcher
        .watch(storage.root(), RecursiveMode::Recursive)
        .map_err(|e| AppError::Fatal(format!("failed to watch {}: {e}", storage.root().display())))?;

    tokio::spawn(debounce_loop(rx, storage, jobs, repository_id));
    Ok(watcher)
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Collapses a burst of events on the same path into one ingest attempt,
/// firing `DEBOUNCE` after the most recent event for that path.
async fn debounce_loop(mut rx: mpsc::UnboundedReceiver<PathBuf>, storage: Arc<StorageLayer>, jobs: Arc<JobQueue>, repository_id: String) {
    let pending: Arc<Mutex<HashMap<PathBuf, tokio::task::JoinHandle<()>>>> = Arc::new(Mutex::new(HashMap::new()));

    while let Some(path) = rx.recv().await {
        if storage.config().is_protected(relative_to_root(storage.root(), &path)) {
            continue;
        }

        let mut pending_guard = pending.lock().await;
        if let Some(existing) = pending_guard.remove(&path) {
            existing.abort();
        }

        let storage = storage.clone();
        let jobs = jobs.clone();
        let repository_id = repository_id.clone();
        let path_for_task = path.clone();
        let pending_clone = pending.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            if let Err(e) = ingest_settled_file(&storage, &jobs, &repository_id, &path_for_task).await {
                tracing::warn!("watcher ingest failed for {}: {e}", path_for_task.display());
            }
            pending_clone.lock().await.remove(&path_for_task);
        });
        pending_guard.insert(path, handle);
    }
}

/// Registers a settled file at its existing path by enqueuing an
/// `ingest_commit` job rather than ingesting inline (§4.5 scenario 3) —
/// staying on the debounce task only long enough to compute the hash, not
/// to wait on catalog/storage I/O.
async fn ingest_settled_file(storage: &StorageLayer, jobs: &JobQueue, repository_id: &str, path: &Path) -> AppResult<()> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(_) => return Ok(()), // deleted before the debounce fired
    };
    if !metadata.is_file() {
        return Ok(());
    }

    let bytes = tokio::fs::read(path).await?;
    let hash = format!("{:x}", Sha256::digest(&bytes));
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let mime = mime_guess(path);
    let relative = relative_to_root(storage.root(), path).to_string_lossy().to_string();

    let unique_key = format!("ingest:{repository_id}:{relative}");
    let payload = json!({
        "repository_id": repository_id,
        "relative_path": relative,
        "original_name": name,
        "mime": mime,
        "hash": hash,
        "size": metadata.len() as i64,
    });
    jobs.enqueue("ingest_commit", &payload, Some(&unique_key), 5).await?;
    Ok(())
}

fn relative_to_root<'a>(root: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}

fn mime_guess(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg".to_string(),
        Some(ext) if ext == "png" => "image/png".to_string(),
        Some(ext) if ext == "mp4" || ext == "mov" => "video/mp4".to_string(),
        Some(ext) if ext == "mp3" => "audio/mpeg".to_string(),
        Some(ext) if ext == "wav" => "audio/wav".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevant_events_exclude_remove_and_access() {
        assert!(is_relevant(&EventKind::Create(notify::event::CreateKind::File)));
        assert!(is_relevant(&EventKind::Modify(notify::event::ModifyKind::Data(notify::event::DataChange::Content))));
        assert!(!is_relevant(&EventKind::Remove(notify::event::RemoveKind::File)));
        assert!(!is_relevant(&EventKind::Access(notify::event::AccessKind::Read)));
    }

    #[test]
    fn mime_guess_falls_back_to_octet_stream() {
        assert_eq!(mime_guess(Path::new("a.nef")), "application/octet-stream");
        assert_eq!(mime_guess(Path::new("a.jpg")), "image/jpeg");
    }
}
