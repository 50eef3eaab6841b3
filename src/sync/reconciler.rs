//! Periodic full-scan reconciler (§4.5 tier 2). Walks user-managed subtrees,
//! diffs cheaply on `(size, mtime)` against `FileRecord`, and hashes lazily
//! only when that cheap diff actually changed. Grounded on the teacher
//! pack's filesystem scanner (`WalkDir::new(dir).follow_links(false)` plus
//! `filter_entry`, tolerating permission errors rather than aborting the
//! walk).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::db::models::{FileRecord, FileRecordState};
use crate::error::{AppError, AppResult};
use crate::jobs::JobQueue;
use crate::storage::layout::RepoConfig;
use crate::storage::StorageLayer;

#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub new: usize,
    pub changed: usize,
    pub missing: usize,
}

/// Runs one reconciliation pass over `storage`'s user-managed area (every
/// subtree that isn't a protected prefix). Idempotent: a second call with
/// no filesystem change between calls enqueues nothing (§8 invariant 7).
pub async fn run_once(
    storage: &StorageLayer,
    catalog: &Catalog,
    jobs: &JobQueue,
    repository_id: &str,
    cancel: &CancellationToken,
) -> AppResult<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    let existing = catalog.list_file_records(repository_id).await?;
    let mut seen = std::collections::HashSet::new();

    let root = storage.root().to_path_buf();
    let config = storage.config().clone();
    let entries = spawn_walk(root.clone(), config.clone()).await?;

    for entry in entries {
        if cancel.is_cancelled() {
            break;
        }

        let relative = entry.relative.to_string_lossy().to_string();
        seen.insert(relative.clone());

        let previous = existing.iter().find(|r| r.relative_path == relative);
        let unchanged = previous.map(|p| p.size == entry.size as i64 && same_instant(p.last_mtime, entry.mtime)).unwrap_or(false);
        if unchanged {
            continue;
        }

        let bytes = tokio::fs::read(root.join(&entry.relative)).await?;
        let hash = format!("{:x}", Sha256::digest(&bytes));
        let absolute = root.join(&entry.relative);
        let name = absolute.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let mime = mime_guess_from_extension(&entry.relative);

        if previous.is_some() {
            summary.changed += 1;
        } else {
            summary.new += 1;
        }

        catalog
            .upsert_file_record(&FileRecord {
                repository_id: repository_id.to_string(),
                relative_path: relative.clone(),
                last_hash: Some(hash.clone()),
                last_mtime: entry.mtime,
                size: entry.size as i64,
                state: FileRecordState::Active.as_str().to_string(),
            })
            .await?;

        // Enqueue the same job kind the watcher uses rather than registering
        // the asset inline, so a large drift doesn't block this scan on
        // catalog I/O for every changed file.
        let unique_key = format!("ingest:{repository_id}:{relative}");
        let payload = json!({
            "repository_id": repository_id,
            "relative_path": relative,
            "original_name": name,
            "mime": mime,
            "hash": hash,
            "size": entry.size as i64,
        });
        jobs.enqueue("ingest_commit", &payload, Some(&unique_key), 5).await?;
    }

    for record in &existing {
        if !seen.contains(&record.relative_path) && record.state != FileRecordState::Missing.as_str() {
            catalog.mark_file_record_missing(repository_id, &record.relative_path).await?;
            if let Some(asset) = catalog.find_by_storage_path(repository_id, &record.relative_path).await? {
                catalog.soft_delete(&asset.id).await?;
            }
            summary.missing += 1;
        }
    }

    Ok(summary)
}

struct ScannedEntry {
    relative: PathBuf,
    size: u64,
    mtime: DateTime<Utc>,
}

/// `WalkDir` traversal and `stat()` calls are blocking I/O; run them on a
/// blocking thread rather than the async reactor.
async fn spawn_walk(root: PathBuf, config: RepoConfig) -> AppResult<Vec<ScannedEntry>> {
    tokio::task::spawn_blocking(move || walk(&root, &config))
        .await
        .map_err(|e| AppError::Internal(format!("reconciler walk task panicked: {e}")))?
}

fn walk(root: &Path, config: &RepoConfig) -> AppResult<Vec<ScannedEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).into_iter().filter_entry(|e| !e.path_is_symlink()) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("reconciler scan error: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        if config.is_protected(&relative) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("reconciler stat error for {}: {e}", relative.display());
                continue;
            }
        };
        let mtime: DateTime<Utc> = metadata.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
        entries.push(ScannedEntry { relative, size: metadata.len(), mtime });
    }
    Ok(entries)
}

fn same_instant(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_seconds().abs() < 1
}

fn mime_guess_from_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg".to_string(),
        Some(ext) if ext == "png" => "image/png".to_string(),
        Some(ext) if ext == "gif" => "image/gif".to_string(),
        Some(ext) if ext == "mp4" || ext == "mov" => "video/mp4".to_string(),
        Some(ext) if ext == "mp3" => "audio/mpeg".to_string(),
        Some(ext) if ext == "wav" => "audio/wav".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::layout::{DuplicatePolicy, StorageStrategy};

    #[test]
    fn same_instant_tolerates_subsecond_rounding() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(200);
        assert!(same_instant(a, b));
    }

    #[test]
    fn mime_guess_recognizes_common_extensions() {
        assert_eq!(mime_guess_from_extension(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_guess_from_extension(Path::new("a.unknown")), "application/octet-stream");
    }

    #[test]
    fn walk_skips_protected_prefixes() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".lumilio/inbox")).unwrap();
        std::fs::write(tmp.path().join(".lumilio/inbox/a.jpg"), b"x").unwrap();
        std::fs::create_dir_all(tmp.path().join("manual")).unwrap();
        std::fs::write(tmp.path().join("manual/b.jpg"), b"y").unwrap();

        let config = RepoConfig {
            id: "r1".to_string(),
            storage_strategy: StorageStrategy::Cas,
            preserve_filename: false,
            duplicate_policy: DuplicatePolicy::Rename,
            protected_prefixes: RepoConfig::default_protected_prefixes(),
            trash_days: 30,
        };
        let entries = walk(tmp.path(), &config).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative, Path::new("manual/b.jpg"));
    }
}
