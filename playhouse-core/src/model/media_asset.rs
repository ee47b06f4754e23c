use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum MediaStatus {
    Processing,
    Ready,
    Failed,
}

/// A resolved media file the scheduler can hand to an overlay. The scheduler
/// only reads `status`, `mime`, `kind`, `duration_sec`, `is_vertical` from
/// it; ingestion and transcoding that produce this row live elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaAsset {
    pub id: Uuid,
    pub source_hash: String,
    pub source_url: String,
    pub kind: MediaKind,
    pub mime: String,
    pub duration_sec: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub is_vertical: Option<bool>,
    pub size_bytes: Option<i64>,
    pub storage_path: Option<String>,
    pub status: MediaStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl MediaAsset {
    pub fn is_ready(&self) -> bool {
        self.status == MediaStatus::Ready
    }
}
