//! The per-tenant playback scheduler: a durable job queue, a single-flight
//! PLAYING lock enforced by conditional `Store` writes, and a
//! dispatch/preemption/resume protocol driven entirely from inside each
//! tenant's serializer.

pub mod events;
pub mod hub;
mod dispatcher;
mod preemption;
mod reconcile;
pub mod serializer;
mod timers;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::store::Store;

pub use events::{PlayAuthor, PlayEvent, PlayMedia, PlayText, StopTarget};
pub use hub::OverlayHub;

use serializer::PerTenantSerializer;
use timers::Timers;

/// Why a `run_guild` pass was entered. Carried for logging only — dispatch
/// logic never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReason {
    Enqueued,
    Watchdog,
    Wake,
    Preempted,
    Reconciled,
    Bootstrap,
}

impl RunReason {
    fn as_str(self) -> &'static str {
        match self {
            RunReason::Enqueued => "enqueued",
            RunReason::Watchdog => "watchdog",
            RunReason::Wake => "wake",
            RunReason::Preempted => "preempted",
            RunReason::Reconciled => "reconciled",
            RunReason::Bootstrap => "bootstrap",
        }
    }
}

/// Per-pass selection hints threaded through `run_guild`'s next-job
/// selection.
#[derive(Debug, Clone, Default)]
pub(crate) struct SelectionHint {
    pub preferred_job_id: Option<Uuid>,
    pub just_finished_job_id: Option<Uuid>,
}

impl SelectionHint {
    fn preferred(job_id: Uuid) -> Self {
        Self {
            preferred_job_id: Some(job_id),
            just_finished_job_id: None,
        }
    }

    fn just_finished(job_id: Uuid) -> Self {
        Self {
            preferred_job_id: None,
            just_finished_job_id: Some(job_id),
        }
    }
}

struct Inner {
    store: Arc<dyn Store>,
    hub: Arc<dyn OverlayHub>,
    config: Config,
    serializer: PerTenantSerializer,
    timers: Timers,
}

/// Handle to the scheduler. Cheap to clone — every clone shares the same
/// serializer, timers, and ports, so it can be handed to timer callbacks and
/// HTTP handlers alike without a process-wide singleton.
#[derive(Clone)]
pub struct Scheduler(Arc<Inner>);

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, hub: Arc<dyn OverlayHub>, config: Config) -> Self {
        Self(Arc::new(Inner {
            store,
            hub,
            config,
            serializer: PerTenantSerializer::new(),
            timers: Timers::new(),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.0.store
    }

    pub(crate) fn hub(&self) -> &Arc<dyn OverlayHub> {
        &self.0.hub
    }

    pub(crate) fn timers(&self) -> &Timers {
        &self.0.timers
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// `OnJobEnqueued`: run the dispatch loop. Calling this while a job is
    /// already PLAYING is a no-op beyond re-confirming the active lock.
    pub fn on_job_enqueued(&self, guild_id: impl Into<String>) {
        self.run_guild_via_serializer(guild_id.into(), RunReason::Enqueued, SelectionHint::default());
    }

    /// `OnPlaybackState`.
    pub fn on_playback_state(
        &self,
        guild_id: impl Into<String>,
        job_id: Option<Uuid>,
        state: impl Into<String>,
        remaining_ms: Option<i64>,
    ) {
        let guild_id = guild_id.into();
        let state = state.into();
        let sched = self.clone();
        self.0.serializer.submit(guild_id.clone(), move || async move {
            reconcile::on_playback_state(&sched, &guild_id, job_id, &state, remaining_ms).await;
        });
    }

    /// `OnPlaybackStopped`: targeted release if `job_id` is a real id, else
    /// every PLAYING row for the tenant — idempotent either way.
    pub fn on_playback_stopped(&self, guild_id: impl Into<String>, job_id: Option<Uuid>) {
        let guild_id = guild_id.into();
        let sched = self.clone();
        self.0.serializer.submit(guild_id.clone(), move || async move {
            reconcile::on_playback_stopped(&sched, &guild_id, job_id, false).await;
        });
    }

    /// `OnManualStop`: like `OnPlaybackStopped` with no target, but also
    /// broadcasts `overlay:stop{jobId:"manual-stop"}`.
    pub fn on_manual_stop(&self, guild_id: impl Into<String>) {
        let guild_id = guild_id.into();
        let sched = self.clone();
        self.0.serializer.submit(guild_id.clone(), move || async move {
            reconcile::on_playback_stopped(&sched, &guild_id, None, true).await;
        });
    }

    /// `PreemptWithJob`.
    pub fn preempt_with_job(&self, guild_id: impl Into<String>, preempting_job_id: Uuid) {
        let guild_id = guild_id.into();
        let sched = self.clone();
        self.0.serializer.submit(guild_id.clone(), move || async move {
            preemption::preempt_with_job(&sched, &guild_id, preempting_job_id).await;
        });
    }

    /// `Bootstrap()`: at startup, re-enter `run_guild` for every tenant with
    /// non-terminal work so crash recovery resumes dispatch without waiting
    /// for a fresh enqueue.
    pub async fn bootstrap(&self) {
        match self.store().list_guilds_with_active_work().await {
            Ok(guild_ids) => {
                info!(count = guild_ids.len(), "bootstrap scanning guilds with active work");
                for guild_id in guild_ids {
                    self.run_guild_via_serializer(guild_id, RunReason::Bootstrap, SelectionHint::default());
                }
            }
            Err(err) => error!(error = %err, "bootstrap: failed to list guilds with active work"),
        }
    }

    fn run_guild_via_serializer(&self, guild_id: String, reason: RunReason, hint: SelectionHint) {
        let sched = self.clone();
        let reason_str = reason.as_str();
        self.0.serializer.submit(guild_id.clone(), move || async move {
            tracing::debug!(guild_id = %guild_id, reason = reason_str, "run_guild entered");
            dispatcher::run_guild(&sched, &guild_id, hint).await;
        });
    }

    /// Re-enters `run_guild` for `guild_id` when a watchdog or wake timer
    /// fires. The server crate never arms timers directly; only the
    /// dispatcher does, via `Timers`.
    pub(crate) fn trigger_timer(&self, guild_id: String, reason: RunReason) {
        self.run_guild_via_serializer(guild_id, reason, SelectionHint::default());
    }
}
