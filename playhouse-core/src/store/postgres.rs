use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::Store;
use crate::error::StoreResult;
use crate::model::{
    CreateJobArgs, Guild, JobStatus, MediaAsset, MemeBoardItem, OverlayClient, PlaybackJob,
    PromoteData, ReleaseTarget, SuspendData, Terminal,
};

/// Postgres-backed `Store`. One adapter, five tables, all writes conditional
/// on the row's current state: a thin struct wrapping a `PgPool`, runtime
/// `query_as` rather than the compile-time `query!` macro so the crate
/// builds without a live database.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the bundled SQL migrations (schema for the core entities plus
    /// their supporting indexes).
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::StoreError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_job(&self, args: CreateJobArgs) -> StoreResult<PlaybackJob> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, PlaybackJob>(
            r#"
            INSERT INTO playback_jobs (
                id, guild_id, media_asset_id, text, show_text, author_name, author_image,
                duration_sec, priority, status, finished_at,
                submission_date, execution_date, scheduled_at,
                started_at, remaining_ms_snapshot, last_playback_state_at,
                resumes_after_job_id, resume_offset_sec
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, 'PENDING', NULL,
                $10, $10, $10,
                NULL, NULL, NULL,
                NULL, 0
            )
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&args.guild_id)
        .bind(args.media_asset_id)
        .bind(&args.text)
        .bind(args.show_text)
        .bind(&args.author_name)
        .bind(&args.author_image)
        .bind(args.duration_sec)
        .bind(args.priority)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_active_playing_job(&self, guild_id: &str) -> StoreResult<Option<PlaybackJob>> {
        let row = sqlx::query_as::<_, PlaybackJob>(
            "SELECT * FROM playback_jobs WHERE guild_id = $1 AND status = 'PLAYING' \
             ORDER BY started_at ASC LIMIT 1",
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_next_pending_root(
        &self,
        guild_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PlaybackJob>> {
        let row = sqlx::query_as::<_, PlaybackJob>(
            "SELECT * FROM playback_jobs \
             WHERE guild_id = $1 AND status = 'PENDING' AND resumes_after_job_id IS NULL \
               AND execution_date <= $2 \
             ORDER BY priority DESC, submission_date ASC, id ASC LIMIT 1",
        )
        .bind(guild_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_earliest_pending_root(&self, guild_id: &str) -> StoreResult<Option<PlaybackJob>> {
        let row = sqlx::query_as::<_, PlaybackJob>(
            "SELECT * FROM playback_jobs \
             WHERE guild_id = $1 AND status = 'PENDING' AND resumes_after_job_id IS NULL \
             ORDER BY execution_date ASC LIMIT 1",
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_pending_job_by_id(
        &self,
        guild_id: &str,
        id: Uuid,
    ) -> StoreResult<Option<PlaybackJob>> {
        let row = sqlx::query_as::<_, PlaybackJob>(
            "SELECT * FROM playback_jobs WHERE id = $1 AND guild_id = $2 AND status = 'PENDING'",
        )
        .bind(id)
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_resumed_child_of(
        &self,
        guild_id: &str,
        parent_id: Uuid,
    ) -> StoreResult<Option<PlaybackJob>> {
        let row = sqlx::query_as::<_, PlaybackJob>(
            "SELECT * FROM playback_jobs \
             WHERE guild_id = $1 AND status = 'PENDING' AND resumes_after_job_id = $2 \
             ORDER BY priority DESC, submission_date ASC, id ASC LIMIT 1",
        )
        .bind(guild_id)
        .bind(parent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_orphaned_resumed_children(
        &self,
        guild_id: &str,
    ) -> StoreResult<Vec<PlaybackJob>> {
        let rows = sqlx::query_as::<_, PlaybackJob>(
            "SELECT c.* FROM playback_jobs c \
             LEFT JOIN playback_jobs p ON p.id = c.resumes_after_job_id \
             WHERE c.guild_id = $1 AND c.status = 'PENDING' AND c.resumes_after_job_id IS NOT NULL \
               AND (p.id IS NULL OR p.status IN ('DONE', 'FAILED')) \
             ORDER BY c.priority DESC, c.submission_date ASC, c.id ASC",
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn promote_to_playing(
        &self,
        id: Uuid,
        guild_id: &str,
        data: PromoteData,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE playback_jobs SET \
                status = 'PLAYING', \
                started_at = $1, \
                duration_sec = $2, \
                resume_offset_sec = $3, \
                execution_date = $1, \
                remaining_ms_snapshot = NULL, \
                last_playback_state_at = NULL \
             WHERE id = $4 AND guild_id = $5 AND status = 'PENDING' AND finished_at IS NULL",
        )
        .bind(data.started_at)
        .bind(data.effective_duration_sec)
        .bind(data.resume_offset_sec)
        .bind(id)
        .bind(guild_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn suspend_for_preemption(
        &self,
        id: Uuid,
        guild_id: &str,
        data: SuspendData,
    ) -> StoreResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE playback_jobs SET \
                status = 'PENDING', \
                started_at = NULL, \
                duration_sec = $1, \
                resumes_after_job_id = $2, \
                resume_offset_sec = $3, \
                execution_date = $4 \
             WHERE id = $5 AND guild_id = $6 AND status = 'PLAYING'",
        )
        .bind(data.remaining_sec)
        .bind(data.preempting_id)
        .bind(data.next_offset)
        .bind(now)
        .bind(id)
        .bind(guild_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn release_job(
        &self,
        guild_id: &str,
        target: ReleaseTarget,
        terminal: Terminal,
        finished_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let status = match terminal.as_status() {
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            _ => unreachable!("Terminal::as_status only returns DONE/FAILED"),
        };
        let result = match target {
            ReleaseTarget::Job(id) => {
                sqlx::query(
                    "UPDATE playback_jobs SET status = $1, finished_at = $2 \
                     WHERE id = $3 AND guild_id = $4 AND status = 'PLAYING'",
                )
                .bind(status)
                .bind(finished_at)
                .bind(id)
                .bind(guild_id)
                .execute(&self.pool)
                .await?
            }
            ReleaseTarget::AllPlayingInGuild => {
                sqlx::query(
                    "UPDATE playback_jobs SET status = $1, finished_at = $2 \
                     WHERE guild_id = $3 AND status = 'PLAYING'",
                )
                .bind(status)
                .bind(finished_at)
                .bind(guild_id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn fail_pending_job(
        &self,
        guild_id: &str,
        id: Uuid,
        finished_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE playback_jobs SET status = 'FAILED', finished_at = $1 \
             WHERE id = $2 AND guild_id = $3 AND status = 'PENDING'",
        )
        .bind(finished_at)
        .bind(id)
        .bind(guild_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_playback_snapshot(
        &self,
        guild_id: &str,
        job_id: Uuid,
        remaining_ms: Option<i64>,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE playback_jobs SET remaining_ms_snapshot = $1, last_playback_state_at = $2 \
             WHERE id = $3 AND guild_id = $4 AND status = 'PLAYING'",
        )
        .bind(remaining_ms)
        .bind(at)
        .bind(job_id)
        .bind(guild_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn recompute_root_execution_dates(
        &self,
        guild_id: &str,
        anchor: DateTime<Utc>,
        step_padding_ms: i64,
    ) -> StoreResult<()> {
        let roots = sqlx::query_as::<_, PlaybackJob>(
            "SELECT * FROM playback_jobs \
             WHERE guild_id = $1 AND status = 'PENDING' AND resumes_after_job_id IS NULL \
             ORDER BY priority DESC, submission_date ASC, id ASC",
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let mut cursor = anchor.max(now);
        for root in roots {
            sqlx::query("UPDATE playback_jobs SET execution_date = $1, scheduled_at = $1 WHERE id = $2")
                .bind(cursor)
                .bind(root.id)
                .execute(&self.pool)
                .await?;
            cursor += chrono::Duration::milliseconds(
                root.duration_sec as i64 * 1000 + step_padding_ms,
            );
        }
        Ok(())
    }

    async fn upsert_guild_busy_until(
        &self,
        guild_id: &str,
        busy_until: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO guilds (id, busy_until, default_media_time_secs) \
             VALUES ($1, $2, 30) \
             ON CONFLICT (id) DO UPDATE SET busy_until = EXCLUDED.busy_until",
        )
        .bind(guild_id)
        .bind(busy_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_guild(&self, guild_id: &str) -> StoreResult<Option<Guild>> {
        let row = sqlx::query_as::<_, Guild>("SELECT * FROM guilds WHERE id = $1")
            .bind(guild_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn ensure_guild(&self, guild_id: &str, default_duration_secs: i32) -> StoreResult<Guild> {
        sqlx::query(
            "INSERT INTO guilds (id, default_media_time_secs) VALUES ($1, $2) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(guild_id)
        .bind(default_duration_secs)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, Guild>("SELECT * FROM guilds WHERE id = $1")
            .bind(guild_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_guilds_with_active_work(&self) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT guild_id FROM playback_jobs WHERE status IN ('PENDING', 'PLAYING')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get_media_asset(&self, id: Uuid) -> StoreResult<Option<MediaAsset>> {
        let row = sqlx::query_as::<_, MediaAsset>("SELECT * FROM media_assets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_meme_board_item(
        &self,
        guild_id: &str,
        item_id: Uuid,
    ) -> StoreResult<Option<MemeBoardItem>> {
        let row = sqlx::query_as::<_, MemeBoardItem>(
            "SELECT * FROM meme_board_items WHERE guild_id = $1 AND id = $2",
        )
        .bind(guild_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn purge_finished_jobs_before(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM playback_jobs WHERE finished_at IS NOT NULL AND finished_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired_media(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM media_assets WHERE expires_at IS NOT NULL AND expires_at < $1 \
             AND id NOT IN (SELECT media_asset_id FROM meme_board_items)",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_overlay_client_by_token_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<OverlayClient>> {
        let row = sqlx::query_as::<_, OverlayClient>(
            "SELECT * FROM overlay_clients WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_overlay_client(
        &self,
        guild_id: &str,
        label: &str,
        token_hash: &str,
        default_author_name: Option<&str>,
        default_author_image: Option<&str>,
    ) -> StoreResult<OverlayClient> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE overlay_clients SET revoked_at = $1 \
             WHERE guild_id = $2 AND label = $3 AND revoked_at IS NULL",
        )
        .bind(now)
        .bind(guild_id)
        .bind(label)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, OverlayClient>(
            "INSERT INTO overlay_clients (
                id, guild_id, label, token_hash, revoked_at, last_seen_at,
                default_author_name, default_author_image
             ) VALUES ($1, $2, $3, $4, NULL, NULL, $5, $6)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(guild_id)
        .bind(label)
        .bind(token_hash)
        .bind(default_author_name)
        .bind(default_author_image)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn touch_overlay_client_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE overlay_clients SET last_seen_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn asset_is_referenced_in_guild(&self, guild_id: &str, asset_id: Uuid) -> StoreResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                SELECT 1 FROM playback_jobs WHERE guild_id = $1 AND media_asset_id = $2
                UNION ALL
                SELECT 1 FROM meme_board_items WHERE guild_id = $1 AND media_asset_id = $2
             )",
        )
        .bind(guild_id)
        .bind(asset_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
