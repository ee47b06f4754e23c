use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::Message;
use dashmap::DashMap;
use uuid::Uuid;

use playhouse_core::scheduler::events::{PlayEvent, StopTarget};
use playhouse_core::OverlayHub;

use super::connection::OverlayConnection;
use super::messages::{Peer, PlayEventPayload, ServerEvent};

/// Per-tenant rooms of connected overlay sockets, addressed by `guild_id`
/// directly (the wire room name `overlay-guild-<guildId>` is a client-side
/// concern only). Implements the scheduler's `OverlayHub` port.
#[derive(Clone)]
pub struct ConnectionManager {
    connections: Arc<DashMap<Uuid, Arc<OverlayConnection>>>,
    rooms: Arc<DashMap<String, Vec<Uuid>>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.connections.len())
            .field("room_count", &self.rooms.len())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
        }
    }

    pub fn add_connection(&self, conn: Arc<OverlayConnection>) {
        self.connections.insert(conn.client_id, conn.clone());
        self.rooms.entry(conn.guild_id.clone()).or_default().push(conn.client_id);
    }

    /// Removes the connection and its room membership. Returns `true` if
    /// the connection's room is now empty — the caller clears the tenant's
    /// busy-lock in that case so a later reconnect doesn't inherit a stale
    /// lease.
    pub fn remove_connection(&self, client_id: Uuid) -> Option<(String, bool)> {
        let conn = self.connections.remove(&client_id)?.1;
        let guild_id = conn.guild_id.clone();

        let room_now_empty = if let Some(mut room) = self.rooms.get_mut(&guild_id) {
            room.retain(|id| *id != client_id);
            room.is_empty()
        } else {
            true
        };
        if room_now_empty {
            self.rooms.remove(&guild_id);
        }
        Some((guild_id, room_now_empty))
    }

    pub fn get_connection(&self, client_id: &Uuid) -> Option<Arc<OverlayConnection>> {
        self.connections.get(client_id).map(|c| c.clone())
    }

    fn room_connections(&self, guild_id: &str) -> Vec<Arc<OverlayConnection>> {
        self.rooms
            .get(guild_id)
            .map(|room| {
                room.iter()
                    .filter_map(|id| self.connections.get(id).map(|c| c.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stable sort by `label` then `client_id`, deduplicated by `client_id`.
    pub fn peers(&self, guild_id: &str) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self
            .room_connections(guild_id)
            .into_iter()
            .map(|c| Peer { client_id: c.client_id, label: c.label.clone() })
            .collect();
        peers.sort_by(|a, b| a.label.cmp(&b.label).then(a.client_id.cmp(&b.client_id)));
        peers.dedup_by(|a, b| a.client_id == b.client_id);
        peers
    }

    pub async fn broadcast_peers(&self, guild_id: &str) {
        let event = ServerEvent::Peers { guild_id: guild_id.to_string(), peers: self.peers(guild_id) };
        self.broadcast(guild_id, &event);
    }

    fn broadcast(&self, guild_id: &str, event: &ServerEvent) {
        let Ok(text) = serde_json::to_string(event) else {
            tracing::error!(guild_id, "failed to serialize overlay event");
            return;
        };
        for conn in self.room_connections(guild_id) {
            conn.send(Message::Text(text.clone().into()));
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OverlayHub for ConnectionManager {
    async fn room_size(&self, guild_id: &str) -> usize {
        self.rooms.get(guild_id).map(|room| room.len()).unwrap_or(0)
    }

    async fn emit_play(&self, guild_id: &str, event: PlayEvent) {
        let payload: PlayEventPayload = event.into();
        self.broadcast(guild_id, &ServerEvent::Play { payload });
    }

    async fn emit_stop(&self, guild_id: &str, target: StopTarget) {
        self.broadcast(guild_id, &ServerEvent::Stop { job_id: target.as_job_id_string() });
    }
}
