pub mod layout;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::models::TrashEntry;
use crate::error::{AppError, AppResult};
use layout::{cas_relative_path, date_relative_path, next_rename_candidate, DuplicatePolicy, RepoConfig, StorageStrategy};

/// Derived-artifact kinds addressable via `write_derived`/`read_derived`.
/// Stored outside the CAS tree at a deterministic path keyed by asset id,
/// matching the data model's "Thumbnail ... stored outside CAS" note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKind {
    ThumbnailSmall,
    ThumbnailMedium,
    ThumbnailLarge,
    Transcoded,
}

impl DerivedKind {
    fn dir_name(&self) -> &'static str {
        match self {
            DerivedKind::ThumbnailSmall => "derived/thumbnails/small",
            DerivedKind::ThumbnailMedium => "derived/thumbnails/medium",
            DerivedKind::ThumbnailLarge => "derived/thumbnails/large",
            DerivedKind::Transcoded => "derived/transcoded",
        }
    }
}

/// Per-destination-path mutex so two concurrent commits never interleave
/// writes to the same file. Keyed by the relative path rather than a single
/// global lock, so unrelated commits never contend.
#[derive(Default)]
struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// Performs the storage-layer commit: staging → canonical repository
/// location, trash relocation, and derived-artifact accessors. One
/// `StorageLayer` per repository root.
pub struct StorageLayer {
    root: PathBuf,
    config: RepoConfig,
    path_locks: PathLocks,
}

impl StorageLayer {
    pub fn new(root: PathBuf, config: RepoConfig) -> Self {
        StorageLayer { root, config, path_locks: PathLocks::default() }
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(".lumilio/staging")
    }

    fn failed_dir(&self) -> PathBuf {
        self.root.join(".lumilio/staging/failed")
    }

    fn trash_dir(&self) -> PathBuf {
        self.root.join(".lumilio/trash")
    }

    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    async fn ensure_parent(path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Writes `bytes` to a private staging directory under a randomized
    /// intermediate name. The caller is responsible for ensuring the
    /// returned path is eventually consumed by `commit` or `move_to_failed`;
    /// both remove the staging file on every exit path.
    pub async fn stage_upload(&self, bytes: &[u8], _name: &str) -> AppResult<PathBuf> {
        let staging = self.staging_dir();
        fs::create_dir_all(&staging).await?;
        let staging_path = staging.join(Uuid::new_v4().to_string());
        let mut file = fs::File::create(&staging_path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(staging_path)
    }

    /// Commits a staged file into its canonical location under the
    /// configured storage strategy. Re-entrant: repeated calls with the same
    /// `content_hash`/`original_name` inputs resolve to the same final path
    /// without duplicating bytes (CAS dedup, or `date`/`flat` re-resolving
    /// the same rename chain deterministically is not guaranteed across
    /// concurrent renamers, but is guaranteed for the caller that holds the
    /// per-path lock for its destination).
    pub async fn commit(
        &self,
        staging_path: &Path,
        content_hash: &str,
        original_name: &str,
        _mime: &str,
    ) -> AppResult<String> {
        let ext = Path::new(original_name)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();

        let relative = match self.config.storage_strategy {
            StorageStrategy::Cas => cas_relative_path(content_hash, &ext),
            StorageStrategy::Date => {
                let desired = date_relative_path(Utc::now(), original_name);
                self.resolve_duplicate(&desired).await?
            }
            StorageStrategy::Flat => self.resolve_duplicate(original_name).await?,
        };

        let destination = self.root.join(&relative);
        let lock = self.path_locks.lock_for(&destination).await;
        let _guard = lock.lock().await;

        Self::ensure_parent(&destination).await?;

        // Under CAS, an existing destination is a dedup hit: reuse it and
        // discard the staging copy without another write.
        if self.config.storage_strategy == StorageStrategy::Cas && fs::metadata(&destination).await.is_ok() {
            let _ = fs::remove_file(staging_path).await;
            return Ok(relative);
        }

        self.place(staging_path, &destination).await?;
        Ok(relative)
    }

    /// Moves or copies `staging_path` to `destination`, preferring an atomic
    /// rename when both paths share a filesystem and falling back to
    /// copy-then-fsync-then-rename across devices.
    async fn place(&self, staging_path: &Path, destination: &Path) -> AppResult<()> {
        match fs::rename(staging_path, destination).await {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                let tmp = destination.with_extension(format!(
                    "{}.tmp-{}",
                    destination.extension().and_then(|e| e.to_str()).unwrap_or(""),
                    Uuid::new_v4()
                ));
                fs::copy(staging_path, &tmp).await?;
                {
                    let file = fs::File::open(&tmp).await?;
                    file.sync_all().await?;
                }
                fs::rename(&tmp, destination).await?;
                let _ = fs::remove_file(staging_path).await;
                Ok(())
            }
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Applies the repository's `duplicate_policy` to a desired relative
    /// path that may already be occupied (used by `date` and `flat`).
    async fn resolve_duplicate(&self, desired: &str) -> AppResult<String> {
        let exists = fs::metadata(self.root.join(desired)).await.is_ok();
        if !exists {
            return Ok(desired.to_string());
        }

        match self.config.duplicate_policy {
            DuplicatePolicy::Reject => Err(AppError::Conflict(format!("'{desired}' already exists"))),
            DuplicatePolicy::Overwrite => Ok(desired.to_string()),
            DuplicatePolicy::Rename => {
                // next_rename_candidate wants a synchronous predicate; since
                // the filesystem check is async, probe candidates in a small
                // bounded loop here instead of threading async through the
                // pure path-arithmetic helper.
                let mut candidate = desired.to_string();
                let mut k: u64 = 1;
                loop {
                    if fs::metadata(self.root.join(&candidate)).await.is_err() {
                        return Ok(candidate);
                    }
                    let path = Path::new(desired);
                    let parent = path.parent().map(|p| p.to_string_lossy().to_string()).unwrap_or_default();
                    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
                    let ext = path.extension().map(|e| e.to_string_lossy().to_string());
                    let name = match &ext {
                        Some(ext) => format!("{stem} ({k}).{ext}"),
                        None => format!("{stem} ({k})"),
                    };
                    candidate = if parent.is_empty() { name } else { format!("{parent}/{name}") };
                    k += 1;
                }
            }
        }
    }

    /// Relocates committed bytes to `trash/<yyyy>/<mm>/<uuid>.<ext>` and
    /// writes a sidecar `.json` with the trash entry metadata. Bytes are
    /// never permanently deleted here — that is `purge_trash`'s job.
    pub async fn move_to_trash(&self, asset_id: &str, relative_path: &str, reason: &str) -> AppResult<String> {
        let source = self.root.join(relative_path);
        let ext = Path::new(relative_path).extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default();
        let now = Utc::now();
        let trash_key = Uuid::new_v4().to_string();
        let trash_relative = if ext.is_empty() {
            format!(".lumilio/trash/{}/{:02}/{trash_key}", now.format("%Y"), now.format("%m"))
        } else {
            format!(".lumilio/trash/{}/{:02}/{trash_key}.{ext}", now.format("%Y"), now.format("%m"))
        };
        let destination = self.root.join(&trash_relative);
        Self::ensure_parent(&destination).await?;
        self.place(&source, &destination).await?;

        let sidecar = TrashEntry {
            original_path: relative_path.to_string(),
            asset_id: asset_id.to_string(),
            deleted_at: now,
            reason: reason.to_string(),
        };
        let sidecar_path = destination.with_extension("json");
        fs::write(&sidecar_path, serde_json::to_vec_pretty(&sidecar).map_err(|e| AppError::Internal(e.to_string()))?).await?;

        Ok(trash_relative)
    }

    /// Permanently removes a trash entry (bytes + sidecar). Only called by
    /// `purge_trash` once `retention.trash_days` has elapsed.
    pub async fn purge_trash_entry(&self, trash_relative_path: &str) -> AppResult<()> {
        let bytes_path = self.root.join(trash_relative_path);
        let sidecar_path = bytes_path.with_extension("json");
        let _ = fs::remove_file(&bytes_path).await;
        let _ = fs::remove_file(&sidecar_path).await;
        Ok(())
    }

    /// Relocates an unprocessable staged upload to
    /// `staging/failed/<name>_<unix>.<ext>` and returns the new path.
    pub async fn move_to_failed(&self, staging_path: &Path, original_name: &str, _reason: &str) -> AppResult<PathBuf> {
        let failed_dir = self.failed_dir();
        fs::create_dir_all(&failed_dir).await?;
        let stem = Path::new(original_name).file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "upload".to_string());
        let ext = Path::new(original_name).extension().map(|e| e.to_string_lossy().to_string());
        let unix = Utc::now().timestamp();
        let name = match ext {
            Some(ext) => format!("{stem}_{unix}.{ext}"),
            None => format!("{stem}_{unix}"),
        };
        let destination = failed_dir.join(name);
        self.place(staging_path, &destination).await?;
        Ok(destination)
    }

    pub async fn open(&self, relative_path: &str) -> AppResult<Vec<u8>> {
        Ok(fs::read(self.root.join(relative_path)).await?)
    }

    pub async fn stat(&self, relative_path: &str) -> AppResult<std::fs::Metadata> {
        Ok(fs::metadata(self.root.join(relative_path)).await?)
    }

    pub async fn write_derived(&self, kind: DerivedKind, asset_id: &str, ext: &str, bytes: &[u8]) -> AppResult<String> {
        let relative = format!("{}/{asset_id}.{ext}", kind.dir_name());
        let destination = self.root.join(".lumilio").join(&relative);
        Self::ensure_parent(&destination).await?;
        fs::write(&destination, bytes).await?;
        Ok(format!(".lumilio/{relative}"))
    }

    pub async fn read_derived(&self, relative_path: &str) -> AppResult<Vec<u8>> {
        Ok(fs::read(self.root.join(relative_path)).await?)
    }
}

fn is_cross_device(e: &std::io::Error) -> bool {
    // `EXDEV` on unix; io::ErrorKind has no portable variant for it yet, so
    // match on the raw OS error code like the rest of this codebase matches
    // errno-shaped conditions explicitly rather than guessing from `kind()`.
    e.raw_os_error() == Some(libc_exdev())
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use layout::RepoConfig;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    fn layer(strategy: StorageStrategy, policy: DuplicatePolicy) -> (TempDir, StorageLayer) {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = RepoConfig {
            id: Uuid::new_v4().to_string(),
            storage_strategy: strategy,
            preserve_filename: true,
            duplicate_policy: policy,
            protected_prefixes: RepoConfig::default_protected_prefixes(),
            trash_days: 30,
        };
        let layer = StorageLayer::new(tmp.path().to_path_buf(), cfg);
        (tmp, layer)
    }

    #[tokio::test]
    async fn cas_commit_round_trips_bytes() {
        let (_tmp, layer) = layer(StorageStrategy::Cas, DuplicatePolicy::Rename);
        let bytes = b"hello world";
        let hash = format!("{:x}", sha2::Sha256::digest(bytes));
        let staging = layer.stage_upload(bytes, "a.txt").await.unwrap();
        let rel = layer.commit(&staging, &hash, "a.txt", "text/plain").await.unwrap();
        assert_eq!(rel, format!("inbox/{}/{}/{}/{}.txt", &hash[0..2], &hash[2..4], &hash[4..6], hash));
        let read_back = layer.open(&rel).await.unwrap();
        assert_eq!(read_back, bytes);
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn cas_commit_is_reentrant_and_dedupes() {
        let (_tmp, layer) = layer(StorageStrategy::Cas, DuplicatePolicy::Rename);
        let bytes = b"same bytes";
        let hash = format!("{:x}", sha2::Sha256::digest(bytes));

        let staging1 = layer.stage_upload(bytes, "a.txt").await.unwrap();
        let rel1 = layer.commit(&staging1, &hash, "a.txt", "text/plain").await.unwrap();

        let staging2 = layer.stage_upload(bytes, "b.txt").await.unwrap();
        let rel2 = layer.commit(&staging2, &hash, "b.txt", "text/plain").await.unwrap();

        assert_eq!(rel1, rel2);
        assert!(!staging2.exists());
    }

    #[tokio::test]
    async fn date_strategy_renames_on_collision() {
        let (_tmp, layer) = layer(StorageStrategy::Date, DuplicatePolicy::Rename);
        let staging1 = layer.stage_upload(b"one", "photo.jpg").await.unwrap();
        let rel1 = layer.commit(&staging1, "h1", "photo.jpg", "image/jpeg").await.unwrap();
        let staging2 = layer.stage_upload(b"two", "photo.jpg").await.unwrap();
        let rel2 = layer.commit(&staging2, "h2", "photo.jpg", "image/jpeg").await.unwrap();
        assert_ne!(rel1, rel2);
        assert!(rel2.contains("photo (1).jpg"));
    }

    #[tokio::test]
    async fn date_strategy_reject_policy_fails_on_collision() {
        let (_tmp, layer) = layer(StorageStrategy::Date, DuplicatePolicy::Reject);
        let staging1 = layer.stage_upload(b"one", "photo.jpg").await.unwrap();
        layer.commit(&staging1, "h1", "photo.jpg", "image/jpeg").await.unwrap();
        let staging2 = layer.stage_upload(b"two", "photo.jpg").await.unwrap();
        let result = layer.commit(&staging2, "h2", "photo.jpg", "image/jpeg").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn move_to_trash_writes_sidecar_and_removes_original() {
        let (_tmp, layer) = layer(StorageStrategy::Cas, DuplicatePolicy::Rename);
        let bytes = b"trash me";
        let hash = format!("{:x}", sha2::Sha256::digest(bytes));
        let staging = layer.stage_upload(bytes, "a.jpg").await.unwrap();
        let rel = layer.commit(&staging, &hash, "a.jpg", "image/jpeg").await.unwrap();

        let trash_rel = layer.move_to_trash("asset-1", &rel, "orphan-commit").await.unwrap();
        assert!(!layer.absolute(&rel).exists());
        let sidecar_bytes = fs::read(layer.absolute(&trash_rel).with_extension("json")).await.unwrap();
        let entry: TrashEntry = serde_json::from_slice(&sidecar_bytes).unwrap();
        assert_eq!(entry.original_path, rel);
        assert_eq!(entry.asset_id, "asset-1");
    }

    #[tokio::test]
    async fn move_to_failed_places_under_staging_failed() {
        let (_tmp, layer) = layer(StorageStrategy::Cas, DuplicatePolicy::Rename);
        let staging = layer.stage_upload(b"broken", "bad.raw").await.unwrap();
        let failed = layer.move_to_failed(&staging, "bad.raw", "decode-failed").await.unwrap();
        assert!(failed.starts_with(layer.root().join(".lumilio/staging/failed")));
        assert!(failed.exists());
        assert!(!staging.exists());
    }
}
