//! End-to-end scheduler tests against in-memory `Store`/`OverlayHub`
//! doubles. Durations are kept at the allowed minimum (`durationSec = 1`)
//! and the padding/grace constants are shrunk in `Config` so these run in
//! real wall-clock seconds rather than minutes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use playhouse_core::config::Config;
use playhouse_core::error::StoreResult;
use playhouse_core::model::{
    CreateJobArgs, Guild, JobStatus, MediaAsset, MediaKind, MediaStatus, MemeBoardItem,
    OverlayClient, PlaybackJob, PromoteData, ReleaseTarget, SuspendData, Terminal,
};
use playhouse_core::scheduler::events::{PlayEvent, StopTarget};
use playhouse_core::scheduler::{OverlayHub, Scheduler};
use playhouse_core::store::Store;
use uuid::Uuid;

#[derive(Default)]
struct InMemoryStore {
    guilds: Mutex<HashMap<String, Guild>>,
    media: Mutex<HashMap<Uuid, MediaAsset>>,
    jobs: Mutex<HashMap<Uuid, PlaybackJob>>,
    meme_items: Mutex<HashMap<Uuid, MemeBoardItem>>,
    overlay_clients: Mutex<HashMap<Uuid, OverlayClient>>,
}

impl InMemoryStore {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn insert_media(&self, asset: MediaAsset) {
        self.media.lock().unwrap().insert(asset.id, asset);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_job(&self, args: CreateJobArgs) -> StoreResult<PlaybackJob> {
        let now = Utc::now();
        let job = PlaybackJob {
            id: Uuid::new_v4(),
            guild_id: args.guild_id,
            media_asset_id: args.media_asset_id,
            text: args.text,
            show_text: args.show_text,
            author_name: args.author_name,
            author_image: args.author_image,
            duration_sec: args.duration_sec,
            priority: args.priority,
            status: JobStatus::Pending,
            finished_at: None,
            submission_date: now,
            execution_date: now,
            scheduled_at: now,
            started_at: None,
            remaining_ms_snapshot: None,
            last_playback_state_at: None,
            resumes_after_job_id: None,
            resume_offset_sec: 0,
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_active_playing_job(&self, guild_id: &str) -> StoreResult<Option<PlaybackJob>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| j.guild_id == guild_id && j.status == JobStatus::Playing)
            .min_by_key(|j| j.started_at)
            .cloned())
    }

    async fn find_next_pending_root(
        &self,
        guild_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PlaybackJob>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| {
                j.guild_id == guild_id
                    && j.status == JobStatus::Pending
                    && j.resumes_after_job_id.is_none()
                    && j.execution_date <= now
            })
            .min_by_key(|j| j.priority_key())
            .cloned())
    }

    async fn find_earliest_pending_root(&self, guild_id: &str) -> StoreResult<Option<PlaybackJob>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| {
                j.guild_id == guild_id && j.status == JobStatus::Pending && j.resumes_after_job_id.is_none()
            })
            .min_by_key(|j| j.execution_date)
            .cloned())
    }

    async fn find_pending_job_by_id(&self, guild_id: &str, id: Uuid) -> StoreResult<Option<PlaybackJob>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .get(&id)
            .filter(|j| j.guild_id == guild_id && j.status == JobStatus::Pending)
            .cloned())
    }

    async fn find_resumed_child_of(
        &self,
        guild_id: &str,
        parent_id: Uuid,
    ) -> StoreResult<Option<PlaybackJob>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| {
                j.guild_id == guild_id
                    && j.status == JobStatus::Pending
                    && j.resumes_after_job_id == Some(parent_id)
            })
            .min_by_key(|j| j.priority_key())
            .cloned())
    }

    async fn find_orphaned_resumed_children(&self, guild_id: &str) -> StoreResult<Vec<PlaybackJob>> {
        let jobs = self.jobs.lock().unwrap();
        let mut orphans: Vec<PlaybackJob> = jobs
            .values()
            .filter(|j| {
                j.guild_id == guild_id
                    && j.status == JobStatus::Pending
                    && j.resumes_after_job_id.is_some_and(|parent_id| {
                        jobs.get(&parent_id).map_or(true, |p| p.status.is_terminal())
                    })
            })
            .cloned()
            .collect();
        orphans.sort_by_key(|j| j.priority_key());
        Ok(orphans)
    }

    async fn promote_to_playing(&self, id: Uuid, guild_id: &str, data: PromoteData) -> StoreResult<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(0);
        };
        if job.guild_id != guild_id || job.status != JobStatus::Pending || job.finished_at.is_some() {
            return Ok(0);
        }
        job.status = JobStatus::Playing;
        job.started_at = Some(data.started_at);
        job.duration_sec = data.effective_duration_sec;
        job.resume_offset_sec = data.resume_offset_sec;
        job.execution_date = data.started_at;
        job.remaining_ms_snapshot = None;
        Ok(1)
    }

    async fn suspend_for_preemption(&self, id: Uuid, guild_id: &str, data: SuspendData) -> StoreResult<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(0);
        };
        if job.guild_id != guild_id || job.status != JobStatus::Playing {
            return Ok(0);
        }
        job.status = JobStatus::Pending;
        job.started_at = None;
        job.duration_sec = data.remaining_sec;
        job.resumes_after_job_id = Some(data.preempting_id);
        job.resume_offset_sec = data.next_offset;
        job.execution_date = Utc::now();
        Ok(1)
    }

    async fn release_job(
        &self,
        guild_id: &str,
        target: ReleaseTarget,
        terminal: Terminal,
        finished_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut count = 0u64;
        for job in jobs.values_mut() {
            if job.guild_id != guild_id || job.status != JobStatus::Playing {
                continue;
            }
            let matches = match target {
                ReleaseTarget::Job(id) => job.id == id,
                ReleaseTarget::AllPlayingInGuild => true,
            };
            if matches {
                job.status = terminal.as_status();
                job.finished_at = Some(finished_at);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn fail_pending_job(&self, guild_id: &str, id: Uuid, finished_at: DateTime<Utc>) -> StoreResult<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(0);
        };
        if job.guild_id != guild_id || job.status != JobStatus::Pending {
            return Ok(0);
        }
        job.status = JobStatus::Failed;
        job.finished_at = Some(finished_at);
        Ok(1)
    }

    async fn update_playback_snapshot(
        &self,
        guild_id: &str,
        job_id: Uuid,
        remaining_ms: Option<i64>,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(0);
        };
        if job.guild_id != guild_id || job.status != JobStatus::Playing {
            return Ok(0);
        }
        job.remaining_ms_snapshot = remaining_ms;
        job.last_playback_state_at = Some(at);
        Ok(1)
    }

    async fn recompute_root_execution_dates(
        &self,
        guild_id: &str,
        anchor: DateTime<Utc>,
        step_padding_ms: i64,
    ) -> StoreResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut roots: Vec<Uuid> = jobs
            .values()
            .filter(|j| {
                j.guild_id == guild_id && j.status == JobStatus::Pending && j.resumes_after_job_id.is_none()
            })
            .map(|j| j.id)
            .collect();
        roots.sort_by_key(|id| jobs[id].priority_key());

        let now = Utc::now();
        let mut cursor = anchor.max(now);
        for id in roots {
            let duration_sec = jobs[&id].duration_sec;
            let job = jobs.get_mut(&id).unwrap();
            job.execution_date = cursor;
            job.scheduled_at = cursor;
            cursor += chrono::Duration::milliseconds(duration_sec as i64 * 1000 + step_padding_ms);
        }
        Ok(())
    }

    async fn upsert_guild_busy_until(&self, guild_id: &str, busy_until: Option<DateTime<Utc>>) -> StoreResult<()> {
        let mut guilds = self.guilds.lock().unwrap();
        guilds
            .entry(guild_id.to_string())
            .or_insert_with(|| Guild::new(guild_id, 30))
            .busy_until = busy_until;
        Ok(())
    }

    async fn get_guild(&self, guild_id: &str) -> StoreResult<Option<Guild>> {
        Ok(self.guilds.lock().unwrap().get(guild_id).cloned())
    }

    async fn ensure_guild(&self, guild_id: &str, default_duration_secs: i32) -> StoreResult<Guild> {
        let mut guilds = self.guilds.lock().unwrap();
        Ok(guilds
            .entry(guild_id.to_string())
            .or_insert_with(|| Guild::new(guild_id, default_duration_secs))
            .clone())
    }

    async fn list_guilds_with_active_work(&self) -> StoreResult<Vec<String>> {
        let jobs = self.jobs.lock().unwrap();
        let mut ids: Vec<String> = jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .map(|j| j.guild_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn get_media_asset(&self, id: Uuid) -> StoreResult<Option<MediaAsset>> {
        Ok(self.media.lock().unwrap().get(&id).cloned())
    }

    async fn get_meme_board_item(&self, guild_id: &str, item_id: Uuid) -> StoreResult<Option<MemeBoardItem>> {
        Ok(self
            .meme_items
            .lock()
            .unwrap()
            .get(&item_id)
            .filter(|i| i.guild_id == guild_id)
            .cloned())
    }

    async fn purge_finished_jobs_before(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let before_ids: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.finished_at.is_some_and(|f| f < before))
            .map(|j| j.id)
            .collect();
        let count = before_ids.len() as u64;
        for id in before_ids {
            jobs.remove(&id);
        }
        Ok(count)
    }

    async fn purge_expired_media(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut media = self.media.lock().unwrap();
        let pinned: std::collections::HashSet<Uuid> = self
            .meme_items
            .lock()
            .unwrap()
            .values()
            .map(|i| i.media_asset_id)
            .collect();
        let expired_ids: Vec<Uuid> = media
            .values()
            .filter(|a| a.expires_at.is_some_and(|e| e < now) && !pinned.contains(&a.id))
            .map(|a| a.id)
            .collect();
        let count = expired_ids.len() as u64;
        for id in expired_ids {
            media.remove(&id);
        }
        Ok(count)
    }

    async fn find_overlay_client_by_token_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<OverlayClient>> {
        Ok(self
            .overlay_clients
            .lock()
            .unwrap()
            .values()
            .find(|c| c.token_hash == token_hash)
            .cloned())
    }

    async fn create_overlay_client(
        &self,
        guild_id: &str,
        label: &str,
        token_hash: &str,
        default_author_name: Option<&str>,
        default_author_image: Option<&str>,
    ) -> StoreResult<OverlayClient> {
        let mut clients = self.overlay_clients.lock().unwrap();
        for client in clients.values_mut() {
            if client.guild_id == guild_id && client.label == label && client.revoked_at.is_none() {
                client.revoked_at = Some(Utc::now());
            }
        }
        let client = OverlayClient {
            id: Uuid::new_v4(),
            guild_id: guild_id.to_string(),
            label: label.to_string(),
            token_hash: token_hash.to_string(),
            revoked_at: None,
            last_seen_at: None,
            default_author_name: default_author_name.map(str::to_string),
            default_author_image: default_author_image.map(str::to_string),
        };
        clients.insert(client.id, client.clone());
        Ok(client)
    }

    async fn touch_overlay_client_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(client) = self.overlay_clients.lock().unwrap().get_mut(&id) {
            client.last_seen_at = Some(at);
        }
        Ok(())
    }

    async fn asset_is_referenced_in_guild(&self, guild_id: &str, asset_id: Uuid) -> StoreResult<bool> {
        let referenced_by_job = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .any(|j| j.guild_id == guild_id && j.media_asset_id == Some(asset_id));
        let referenced_by_meme = self
            .meme_items
            .lock()
            .unwrap()
            .values()
            .any(|i| i.guild_id == guild_id && i.media_asset_id == asset_id);
        Ok(referenced_by_job || referenced_by_meme)
    }
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone)]
enum RecordedEvent {
    Play(PlayEvent),
    Stop(Uuid, bool),
}

#[derive(Default)]
struct TestHub {
    room_size: Mutex<HashMap<String, usize>>,
    events: Mutex<Vec<(String, RecordedEvent)>>,
}

impl TestHub {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_room_size(&self, guild_id: &str, size: usize) {
        self.room_size.lock().unwrap().insert(guild_id.to_string(), size);
    }

    fn play_events(&self) -> Vec<PlayEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, e)| match e {
                RecordedEvent::Play(p) => Some(p.clone()),
                RecordedEvent::Stop(..) => None,
            })
            .collect()
    }

    fn stop_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| matches!(e, RecordedEvent::Stop(..)))
            .count()
    }
}

#[async_trait]
impl OverlayHub for TestHub {
    async fn room_size(&self, guild_id: &str) -> usize {
        *self.room_size.lock().unwrap().get(guild_id).unwrap_or(&0)
    }

    async fn emit_play(&self, guild_id: &str, event: PlayEvent) {
        self.events
            .lock()
            .unwrap()
            .push((guild_id.to_string(), RecordedEvent::Play(event)));
    }

    async fn emit_stop(&self, guild_id: &str, target: StopTarget) {
        let (job_id, manual) = match target {
            StopTarget::Job(id) => (id, false),
            StopTarget::ManualStop => (Uuid::nil(), true),
        };
        self.events
            .lock()
            .unwrap()
            .push((guild_id.to_string(), RecordedEvent::Stop(job_id, manual)));
    }
}

fn test_config() -> Config {
    Config {
        default_duration_secs: 30,
        pairing_code_ttl_minutes: 10,
        playback_job_retention_hours: 72,
        media_cache_ttl_hours: 720,
        api_url: "http://localhost:8080".to_string(),
        log: "info".to_string(),
        database_url: String::new(),
        lock_padding_ms: 10,
        stale_grace_secs: 1,
        min_busy_lock_ms: 100,
        snapshot_max_age_secs: 15,
        guild_run_max_iterations: 25,
        meme_job_priority: 100,
        server_host: "0.0.0.0".to_string(),
        server_port: 8080,
        purge_interval_secs: 60,
    }
}

fn ready_image_asset() -> MediaAsset {
    MediaAsset {
        id: Uuid::new_v4(),
        source_hash: Uuid::new_v4().to_string(),
        source_url: "https://example.com/a.png".to_string(),
        kind: MediaKind::Image,
        mime: "image/png".to_string(),
        duration_sec: None,
        width: Some(512),
        height: Some(512),
        is_vertical: Some(false),
        size_bytes: Some(1024),
        storage_path: Some("/tmp/a.png".to_string()),
        status: MediaStatus::Ready,
        expires_at: None,
        last_accessed_at: None,
    }
}

async fn wait_until<F: Fn() -> bool>(pred: F, timeout: Duration) {
    let start = tokio::time::Instant::now();
    while !pred() {
        if start.elapsed() > timeout {
            panic!("condition not met within timeout");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn single_job_with_no_overlay_fails() {
    let store = InMemoryStore::new();
    let hub = TestHub::new();
    let sched = Scheduler::new(store.clone(), hub.clone(), test_config());

    let job = store
        .create_job(CreateJobArgs {
            guild_id: "g1".to_string(),
            media_asset_id: None,
            text: Some("hi".to_string()),
            show_text: true,
            author_name: None,
            author_image: None,
            duration_sec: 5,
            priority: 0,
        })
        .await
        .unwrap();

    sched.on_job_enqueued("g1");

    wait_until(
        || {
            store
                .jobs
                .lock()
                .unwrap()
                .get(&job.id)
                .map(|j| j.status == JobStatus::Failed)
                .unwrap_or(false)
        },
        Duration::from_secs(2),
    )
    .await;

    assert!(hub.play_events().is_empty(), "no overlay connected must never receive PLAY");
}

#[tokio::test]
async fn two_jobs_dispatch_in_fifo_order() {
    let store = InMemoryStore::new();
    let hub = TestHub::new();
    hub.set_room_size("g1", 1);
    let sched = Scheduler::new(store.clone(), hub.clone(), test_config());

    let a = store
        .create_job(CreateJobArgs {
            guild_id: "g1".to_string(),
            media_asset_id: None,
            text: Some("A".to_string()),
            show_text: true,
            author_name: None,
            author_image: None,
            duration_sec: 1,
            priority: 0,
        })
        .await
        .unwrap();
    let b = store
        .create_job(CreateJobArgs {
            guild_id: "g1".to_string(),
            media_asset_id: None,
            text: Some("B".to_string()),
            show_text: true,
            author_name: None,
            author_image: None,
            duration_sec: 1,
            priority: 0,
        })
        .await
        .unwrap();

    sched.on_job_enqueued("g1");

    wait_until(|| !hub.play_events().is_empty(), Duration::from_secs(2)).await;
    assert_eq!(hub.play_events()[0].job_id, a.id);

    sched.on_playback_state("g1", Some(a.id), "ended", Some(0));

    wait_until(|| hub.play_events().len() >= 2, Duration::from_secs(2)).await;
    assert_eq!(hub.play_events()[1].job_id, b.id);
}

#[tokio::test]
async fn watchdog_releases_silent_overlay() {
    let mut cfg = test_config();
    cfg.stale_grace_secs = 0;
    let store = InMemoryStore::new();
    let hub = TestHub::new();
    hub.set_room_size("g1", 1);
    let sched = Scheduler::new(store.clone(), hub.clone(), cfg);

    let job = store
        .create_job(CreateJobArgs {
            guild_id: "g1".to_string(),
            media_asset_id: None,
            text: Some("A".to_string()),
            show_text: true,
            author_name: None,
            author_image: None,
            duration_sec: 1,
            priority: 0,
        })
        .await
        .unwrap();

    sched.on_job_enqueued("g1");
    wait_until(|| !hub.play_events().is_empty(), Duration::from_secs(2)).await;

    // The overlay never reports PLAYBACK_STATE=ended; the watchdog must
    // still release the job once `durationSec + lockPadding + staleGrace`
    // elapses.
    wait_until(
        || {
            store
                .jobs
                .lock()
                .unwrap()
                .get(&job.id)
                .map(|j| j.status == JobStatus::Done)
                .unwrap_or(false)
        },
        Duration::from_secs(3),
    )
    .await;
}

#[tokio::test]
async fn dispatch_builds_play_event_from_ready_media_asset() {
    let store = InMemoryStore::new();
    let hub = TestHub::new();
    hub.set_room_size("g1", 1);
    let sched = Scheduler::new(store.clone(), hub.clone(), test_config());

    let asset = ready_image_asset();
    let asset_id = asset.id;
    store.insert_media(asset);

    store
        .create_job(CreateJobArgs {
            guild_id: "g1".to_string(),
            media_asset_id: Some(asset_id),
            text: Some("look at this".to_string()),
            show_text: true,
            author_name: Some("ada".to_string()),
            author_image: None,
            duration_sec: 4,
            priority: 0,
        })
        .await
        .unwrap();

    sched.on_job_enqueued("g1");
    wait_until(|| !hub.play_events().is_empty(), Duration::from_secs(2)).await;

    let event = hub.play_events().into_iter().next().unwrap();
    let media = event.media.expect("play event must carry the resolved media");
    assert_eq!(media.asset_id, asset_id);
    assert_eq!(media.kind, "image");
    assert!(media.url.contains(&asset_id.to_string()));
    assert_eq!(event.author.name.as_deref(), Some("ada"));
}

#[tokio::test]
async fn meme_preemption_resumes_with_nondecreasing_offset() {
    let store = InMemoryStore::new();
    let hub = TestHub::new();
    hub.set_room_size("g1", 1);
    let sched = Scheduler::new(store.clone(), hub.clone(), test_config());

    let a = store
        .create_job(CreateJobArgs {
            guild_id: "g1".to_string(),
            media_asset_id: None,
            text: Some("A".to_string()),
            show_text: true,
            author_name: None,
            author_image: None,
            duration_sec: 3,
            priority: 0,
        })
        .await
        .unwrap();

    sched.on_job_enqueued("g1");
    wait_until(|| !hub.play_events().is_empty(), Duration::from_secs(2)).await;

    tokio::time::sleep(Duration::from_millis(500)).await;

    let meme = store
        .create_job(CreateJobArgs {
            guild_id: "g1".to_string(),
            media_asset_id: None,
            text: Some("MEME".to_string()),
            show_text: true,
            author_name: None,
            author_image: None,
            duration_sec: 1,
            priority: 100,
        })
        .await
        .unwrap();

    sched.preempt_with_job("g1", meme.id);

    wait_until(|| hub.play_events().iter().any(|p| p.job_id == meme.id), Duration::from_secs(2)).await;
    assert_eq!(hub.stop_count(), 1, "preemption must STOP the suspended job");

    let suspended = store.jobs.lock().unwrap().get(&a.id).cloned().unwrap();
    assert_eq!(suspended.status, JobStatus::Pending);
    assert_eq!(suspended.resumes_after_job_id, Some(meme.id));
    assert!(suspended.resume_offset_sec >= 0, "resume offset must be non-negative");

    sched.on_playback_state("g1", Some(meme.id), "ended", Some(0));

    wait_until(
        || hub.play_events().iter().filter(|p| p.job_id == a.id).count() > 0,
        Duration::from_secs(2),
    )
    .await;

    let resumed_play = hub.play_events().into_iter().rev().find(|p| p.job_id == a.id).unwrap();
    let offset = resumed_play.media.as_ref().and_then(|m| m.start_offset_sec);
    assert!(
        offset.is_none() || offset.unwrap() >= 0,
        "resumed job's start offset must never be negative"
    );
}
