use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// One authenticated overlay socket. `guild_id`/`label` are fixed at
/// handshake time; `last_seen_at` updates on every heartbeat and inbound
/// frame so the hub can report a healthy peer list.
#[derive(Clone)]
pub struct OverlayConnection {
    pub client_id: Uuid,
    pub guild_id: String,
    pub label: String,
    pub author_name: Option<String>,
    pub author_image: Option<String>,
    sender: mpsc::UnboundedSender<Message>,
    last_seen_at: Arc<RwLock<DateTime<Utc>>>,
}

impl fmt::Debug for OverlayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayConnection")
            .field("client_id", &self.client_id)
            .field("guild_id", &self.guild_id)
            .field("label", &self.label)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl OverlayConnection {
    pub fn new(
        client_id: Uuid,
        guild_id: String,
        label: String,
        author_name: Option<String>,
        author_image: Option<String>,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            client_id,
            guild_id,
            label,
            author_name,
            author_image,
            sender,
            last_seen_at: Arc::new(RwLock::new(Utc::now())),
        }
    }

    pub fn send(&self, message: Message) {
        if self.sender.send(message).is_err() {
            tracing::debug!(client_id = %self.client_id, "dropping send to closed overlay connection");
        }
    }

    pub async fn touch_last_seen(&self) {
        *self.last_seen_at.write().await = Utc::now();
    }

    pub async fn last_seen_at(&self) -> DateTime<Utc> {
        *self.last_seen_at.read().await
    }
}
