use std::collections::HashMap;
use std::path::Path;

use crate::error::{AppError, AppResult};

/// Where a repository places committed originals on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStrategy {
    Cas,
    Date,
    Flat,
}

impl StorageStrategy {
    pub fn parse(s: &str) -> AppResult<Self> {
        match s.trim() {
            "cas" => Ok(StorageStrategy::Cas),
            "date" => Ok(StorageStrategy::Date),
            "flat" => Ok(StorageStrategy::Flat),
            other => Err(AppError::Fatal(format!("unknown storage_strategy '{other}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageStrategy::Cas => "cas",
            StorageStrategy::Date => "date",
            StorageStrategy::Flat => "flat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    Rename,
    Reject,
    Overwrite,
}

impl DuplicatePolicy {
    pub fn parse(s: &str) -> AppResult<Self> {
        match s.trim() {
            "rename" => Ok(DuplicatePolicy::Rename),
            "reject" => Ok(DuplicatePolicy::Reject),
            "overwrite" => Ok(DuplicatePolicy::Overwrite),
            other => Err(AppError::Fatal(format!("unknown duplicate_policy '{other}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Rename => "rename",
            DuplicatePolicy::Reject => "reject",
            DuplicatePolicy::Overwrite => "overwrite",
        }
    }
}

/// Parsed `.lumilio/repo.conf`. The format is a small flat key/value document
/// (`key = value` per line, `#` comments, blank lines ignored) — no crate in
/// this codebase's lineage parses a bespoke config format, so this is
/// written by hand in the same plain, explicit style as the rest of the
/// config layer rather than pulled in via a new dependency.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub id: String,
    pub storage_strategy: StorageStrategy,
    pub preserve_filename: bool,
    pub duplicate_policy: DuplicatePolicy,
    pub protected_prefixes: Vec<String>,
    pub trash_days: i64,
}

impl RepoConfig {
    pub fn default_protected_prefixes() -> Vec<String> {
        vec![".lumilio".to_string()]
    }

    pub fn parse(text: &str) -> AppResult<Self> {
        let mut fields: HashMap<String, String> = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let id = fields
            .get("id")
            .cloned()
            .ok_or_else(|| AppError::Fatal("repo.conf missing 'id'".to_string()))?;
        let storage_strategy = StorageStrategy::parse(
            fields.get("storage_strategy").map(String::as_str).unwrap_or("cas"),
        )?;
        let preserve_filename = fields
            .get("preserve_filename")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let duplicate_policy = DuplicatePolicy::parse(
            fields.get("duplicate_policy").map(String::as_str).unwrap_or("rename"),
        )?;
        let protected_prefixes = fields
            .get("protected_prefixes")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(Self::default_protected_prefixes);
        let trash_days = fields
            .get("retention.trash_days")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(RepoConfig {
            id,
            storage_strategy,
            preserve_filename,
            duplicate_policy,
            protected_prefixes,
            trash_days,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "id = {}\nstorage_strategy = {}\npreserve_filename = {}\nduplicate_policy = {}\nprotected_prefixes = {}\nretention.trash_days = {}\n",
            self.id,
            self.storage_strategy.as_str(),
            self.preserve_filename,
            self.duplicate_policy.as_str(),
            self.protected_prefixes.join(","),
            self.trash_days,
        )
    }

    /// True if `relative_path` falls under a protected prefix and must never
    /// be touched by the watcher or reconciler.
    pub fn is_protected(&self, relative_path: &Path) -> bool {
        self.protected_prefixes.iter().any(|prefix| {
            relative_path
                .components()
                .next()
                .map(|c| c.as_os_str() == prefix.as_str())
                .unwrap_or(false)
        })
    }
}

/// Computes the CAS relative path `inbox/<h[0:2]>/<h[2:4]>/<h[4:6]>/<hash><ext>`.
pub fn cas_relative_path(hash: &str, ext: &str) -> String {
    let h = hash.to_ascii_lowercase();
    let a = &h[0..2.min(h.len())];
    let b = &h[2..4.min(h.len())];
    let c = &h[4..6.min(h.len())];
    if ext.is_empty() {
        format!("inbox/{a}/{b}/{c}/{h}")
    } else {
        format!("inbox/{a}/{b}/{c}/{h}.{ext}")
    }
}

/// Computes the `date` strategy's relative path `<YYYY>/<MM>/<filename>`.
pub fn date_relative_path(when: chrono::DateTime<chrono::Utc>, filename: &str) -> String {
    format!("{}/{:02}/{}", when.format("%Y"), when.format("%m"), filename)
}

/// Given a desired relative path that already exists, returns the smallest
/// `name (k).ext` variant that does not, per the `rename` duplicate policy.
/// `exists` is injected so the scan can run against the real filesystem in
/// production and an in-memory set in tests.
pub fn next_rename_candidate(
    desired: &str,
    mut exists: impl FnMut(&str) -> bool,
) -> String {
    if !exists(desired) {
        return desired.to_string();
    }

    let path = Path::new(desired);
    let parent = path.parent().map(|p| p.to_string_lossy().to_string()).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());

    let mut k: u64 = 1;
    loop {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem} ({k}).{ext}"),
            None => format!("{stem} ({k})"),
        };
        let candidate = if parent.is_empty() {
            candidate_name
        } else {
            format!("{parent}/{candidate_name}")
        };
        if !exists(&candidate) {
            return candidate;
        }
        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_path_splits_hash_prefix() {
        let p = cas_relative_path("abcdef0123456789", "jpg");
        assert_eq!(p, "inbox/ab/cd/ef/abcdef0123456789.jpg");
    }

    #[test]
    fn date_path_zero_pads_month() {
        use chrono::TimeZone;
        let when = chrono::Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap();
        assert_eq!(date_relative_path(when, "a.jpg"), "2026/03/a.jpg");
    }

    #[test]
    fn rename_candidate_picks_smallest_free_k() {
        let taken = ["photo.jpg", "photo (1).jpg"];
        let result = next_rename_candidate("photo.jpg", |p| taken.contains(&p));
        assert_eq!(result, "photo (2).jpg");
    }

    #[test]
    fn rename_candidate_is_noop_when_free() {
        let result = next_rename_candidate("photo.jpg", |_| false);
        assert_eq!(result, "photo.jpg");
    }

    #[test]
    fn repo_config_roundtrips_through_render() {
        let cfg = RepoConfig {
            id: "11111111-1111-1111-1111-111111111111".to_string(),
            storage_strategy: StorageStrategy::Cas,
            preserve_filename: false,
            duplicate_policy: DuplicatePolicy::Rename,
            protected_prefixes: RepoConfig::default_protected_prefixes(),
            trash_days: 30,
        };
        let rendered = cfg.render();
        let parsed = RepoConfig::parse(&rendered).unwrap();
        assert_eq!(parsed.id, cfg.id);
        assert_eq!(parsed.storage_strategy, StorageStrategy::Cas);
        assert_eq!(parsed.duplicate_policy, DuplicatePolicy::Rename);
        assert_eq!(parsed.trash_days, 30);
    }

    #[test]
    fn protected_prefix_matches_first_component() {
        let cfg = RepoConfig {
            id: "x".to_string(),
            storage_strategy: StorageStrategy::Cas,
            preserve_filename: false,
            duplicate_policy: DuplicatePolicy::Rename,
            protected_prefixes: vec![".lumilio".to_string()],
            trash_days: 30,
        };
        assert!(cfg.is_protected(Path::new(".lumilio/inbox/ab/x.jpg")));
        assert!(!cfg.is_protected(Path::new("manual/a.gif")));
    }
}
