use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant. One queue, one busy-lock, one overlay room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Guild {
    pub id: String,
    /// Advisory "tenant is busy until" lease. Never authoritative for the
    /// single-playing guarantee — a PLAYING row is.
    pub busy_until: Option<DateTime<Utc>>,
    pub default_media_time_secs: i32,
    pub max_media_time_secs: Option<i32>,
}

impl Guild {
    pub fn new(id: impl Into<String>, default_media_time_secs: i32) -> Self {
        Self {
            id: id.into(),
            busy_until: None,
            default_media_time_secs,
            max_media_time_secs: None,
        }
    }

    /// Clamps a producer-requested duration to this guild's policy.
    pub fn clamp_duration(&self, requested: Option<i32>) -> i32 {
        let base = requested.unwrap_or(self.default_media_time_secs).max(1);
        match self.max_media_time_secs {
            Some(max) if max > 0 => base.min(max),
            _ => base,
        }
    }
}
