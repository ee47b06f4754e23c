use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pairing record for an authenticated display endpoint: the row shape
/// the overlay hub's handshake checks against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OverlayClient {
    pub id: Uuid,
    pub guild_id: String,
    pub label: String,
    pub token_hash: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub default_author_name: Option<String>,
    pub default_author_image: Option<String>,
}

impl OverlayClient {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// A pinned meme-board entry; the scheduler only ever reads the resolved
/// media of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MemeBoardItem {
    pub id: Uuid,
    pub guild_id: String,
    pub media_asset_id: Uuid,
}
