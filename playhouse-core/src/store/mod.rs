pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::model::{
    CreateJobArgs, Guild, MediaAsset, MemeBoardItem, OverlayClient, PlaybackJob, PromoteData,
    ReleaseTarget, SuspendData, Terminal,
};

pub use postgres::PgStore;

/// Durable record of jobs, media assets, tenants, and overlay clients. The
/// scheduler's single source of truth across restarts.
///
/// Every conditional write returns the number of rows it actually touched.
/// Zero rows is not an error: it means the state already moved (e.g. the job
/// was already released by a racing watchdog) and the caller must re-enter
/// `run_guild` to reconcile.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_job(&self, args: CreateJobArgs) -> StoreResult<PlaybackJob>;

    /// Ordered by `started_at ASC` for robustness — if two rows were ever
    /// PLAYING at once (a bug elsewhere), we at least act on the oldest.
    async fn find_active_playing_job(&self, guild_id: &str) -> StoreResult<Option<PlaybackJob>>;

    /// PENDING roots with `execution_date <= now`, ordered
    /// `(priority DESC, submission_date ASC, id ASC)`.
    async fn find_next_pending_root(
        &self,
        guild_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PlaybackJob>>;

    /// A specific PENDING job, scoped to its guild — used to confirm a
    /// preferred/preempting job id is still eligible before dispatching it.
    async fn find_pending_job_by_id(
        &self,
        guild_id: &str,
        id: Uuid,
    ) -> StoreResult<Option<PlaybackJob>>;

    async fn find_resumed_child_of(
        &self,
        guild_id: &str,
        parent_id: Uuid,
    ) -> StoreResult<Option<PlaybackJob>>;

    /// The PENDING root with the earliest `execution_date`, regardless of
    /// whether it has arrived yet — used only to arm the wake timer, never
    /// to select a job for dispatch.
    async fn find_earliest_pending_root(&self, guild_id: &str) -> StoreResult<Option<PlaybackJob>>;

    /// PENDING children whose parent is terminal or missing (recovery path).
    async fn find_orphaned_resumed_children(
        &self,
        guild_id: &str,
    ) -> StoreResult<Vec<PlaybackJob>>;

    /// Conditional on `status = PENDING AND finished_at IS NULL`.
    async fn promote_to_playing(
        &self,
        id: Uuid,
        guild_id: &str,
        data: PromoteData,
    ) -> StoreResult<u64>;

    /// Conditional on `status = PLAYING`.
    async fn suspend_for_preemption(
        &self,
        id: Uuid,
        guild_id: &str,
        data: SuspendData,
    ) -> StoreResult<u64>;

    /// Conditional on `status = PLAYING`. `target` selects a specific job or
    /// every PLAYING row for the guild (the over-release mode used when a
    /// stop event carries no resolvable job id).
    async fn release_job(
        &self,
        guild_id: &str,
        target: ReleaseTarget,
        terminal: Terminal,
        finished_at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Fails a PENDING job directly — the dispatch step's "media
    /// unavailable" / "no audience" path, which never promotes the job to
    /// PLAYING before failing it. Conditional on `status = PENDING`.
    async fn fail_pending_job(
        &self,
        guild_id: &str,
        id: Uuid,
        finished_at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn update_playback_snapshot(
        &self,
        guild_id: &str,
        job_id: Uuid,
        remaining_ms: Option<i64>,
        at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Re-serializes PENDING root `execution_date`s in priority-tuple order,
    /// starting at `max(now, anchor)`, purely for UX observability — never
    /// relied on to enforce the single-playing invariant.
    async fn recompute_root_execution_dates(
        &self,
        guild_id: &str,
        anchor: DateTime<Utc>,
        step_padding_ms: i64,
    ) -> StoreResult<()>;

    async fn upsert_guild_busy_until(
        &self,
        guild_id: &str,
        busy_until: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    async fn get_guild(&self, guild_id: &str) -> StoreResult<Option<Guild>>;

    /// Inserts a guild with default policy if it does not exist yet.
    async fn ensure_guild(&self, guild_id: &str, default_duration_secs: i32) -> StoreResult<Guild>;

    /// Guilds with any non-terminal job, for `Bootstrap()`.
    async fn list_guilds_with_active_work(&self) -> StoreResult<Vec<String>>;

    async fn get_media_asset(&self, id: Uuid) -> StoreResult<Option<MediaAsset>>;

    async fn get_meme_board_item(
        &self,
        guild_id: &str,
        item_id: Uuid,
    ) -> StoreResult<Option<MemeBoardItem>>;

    /// Deletes terminal jobs older than `before`.
    async fn purge_finished_jobs_before(&self, before: DateTime<Utc>) -> StoreResult<u64>;

    /// Deletes expired, unpinned media assets.
    async fn purge_expired_media(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Looked up on every WebSocket handshake and HTTP bearer auth. Revoked
    /// clients are returned too — callers check `is_revoked`.
    async fn find_overlay_client_by_token_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<OverlayClient>>;

    /// Inserts a pairing record, revoking any prior token for the same
    /// `(guild_id, label)` so a re-paired device can't be impersonated by
    /// its old token.
    async fn create_overlay_client(
        &self,
        guild_id: &str,
        label: &str,
        token_hash: &str,
        default_author_name: Option<&str>,
        default_author_image: Option<&str>,
    ) -> StoreResult<OverlayClient>;

    async fn touch_overlay_client_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Whether `asset_id` is reachable from `guild_id` through either a
    /// PlaybackJob or a MemeBoardItem — the tenant-scoping check the media
    /// streaming endpoint runs before it will open a file.
    async fn asset_is_referenced_in_guild(&self, guild_id: &str, asset_id: Uuid) -> StoreResult<bool>;
}
