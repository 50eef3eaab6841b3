use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Read models (database rows) ─────────────────────────────────────────────
//
// Each struct maps 1-to-1 to a database table row. `sqlx::FromRow` is derived
// so sqlx can hydrate them directly from query results without manual
// mapping. Timestamp columns are stored as TEXT in SQLite and mapped to
// DateTime<Utc> via the chrono integration.

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Repository {
    pub id: String,
    pub root_path: String,
    pub storage_strategy: String,
    pub preserve_filename: bool,
    pub duplicate_policy: String,
    pub created_at: DateTime<Utc>,
}

/// `status` is stored as two columns (`status_state`, `status_reason`) rather
/// than a nested document — SQLite has no native struct column, and this
/// keeps `UPDATE status = ...` a single-column write in the common case.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
    pub id: String,
    pub repository_id: String,
    pub hash: String,
    pub mime_type: String,
    pub asset_type: String,
    pub original_filename: String,
    pub storage_path: String,
    pub size: i64,
    pub upload_time: DateTime<Utc>,
    pub taken_time: Option<DateTime<Utc>>,
    pub status_state: String,
    pub status_reason: Option<String>,
    pub is_deleted: bool,
    /// JSON-encoded type-dependent key/value map.
    pub specific_metadata: String,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    Pending,
    Ready,
    Failed,
}

impl AssetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetState::Pending => "pending",
            AssetState::Ready => "ready",
            AssetState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Thumbnail {
    pub asset_id: String,
    pub size: String,
    pub path: String,
    pub width: i32,
    pub height: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Embedding {
    pub asset_id: String,
    pub model_id: String,
    /// Little-endian packed `f32` vector.
    pub vector: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRecordState {
    Active,
    Missing,
    Suspect,
}

impl FileRecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRecordState::Active => "active",
            FileRecordState::Missing => "missing",
            FileRecordState::Suspect => "suspect",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "missing" => FileRecordState::Missing,
            "suspect" => FileRecordState::Suspect,
            _ => FileRecordState::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub repository_id: String,
    pub relative_path: String,
    pub last_hash: Option<String>,
    pub last_mtime: DateTime<Utc>,
    pub size: i64,
    pub state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Available,
    Running,
    Retryable,
    Completed,
    Discarded,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Available => "available",
            JobState::Running => "running",
            JobState::Retryable => "retryable",
            JobState::Completed => "completed",
            JobState::Discarded => "discarded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub payload: Vec<u8>,
    pub attempt: i64,
    pub max_attempts: i64,
    pub state: String,
    pub scheduled_at: DateTime<Utc>,
    pub unique_key: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Checkpoint {
    pub key: String,
    pub blob: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

/// Not a catalog row — `TrashEntry` lives as a JSON sidecar file next to the
/// relocated bytes on disk (see `storage::layout`), per the repository
/// layout contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashEntry {
    pub original_path: String,
    pub asset_id: String,
    pub deleted_at: DateTime<Utc>,
    pub reason: String,
}

// ─── Utility types ────────────────────────────────────────────────────────────

/// A single hit returned by the catalog's filename/metadata full-text search.
#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub asset_id: String,
    pub original_filename: String,
    pub snippet: String,
}
