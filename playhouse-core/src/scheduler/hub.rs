use async_trait::async_trait;

use super::events::{PlayEvent, StopTarget};

/// Per-tenant room of connected overlay sockets. The scheduler only ever
/// addresses rooms by `guildId`; it never touches a socket directly.
/// Authentication, handshake, and the peer-list/heartbeat bookkeeping live
/// entirely on the concrete implementation in the server crate — the
/// scheduler depends only on this port.
#[async_trait]
pub trait OverlayHub: Send + Sync {
    /// Number of sockets currently joined to `overlay-guild-<guildId>`.
    /// Used by the dispatch step to refuse to play to an empty room.
    async fn room_size(&self, guild_id: &str) -> usize;

    /// Broadcasts `overlay:play` to the tenant's room.
    async fn emit_play(&self, guild_id: &str, event: PlayEvent);

    /// Broadcasts `overlay:stop` to the tenant's room.
    async fn emit_stop(&self, guild_id: &str, target: StopTarget);
}
