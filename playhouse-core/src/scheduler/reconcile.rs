use chrono::{Duration as ChronoDuration, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::model::{ReleaseTarget, Terminal};

use super::events::StopTarget;
use super::timers::TimerKind;
use super::{dispatcher, RunReason, Scheduler, SelectionHint};

const MAX_REMAINING_MS: i64 = 24 * 60 * 60 * 1000;

/// `OnPlaybackState`.
pub(crate) async fn on_playback_state(
    sched: &Scheduler,
    guild_id: &str,
    job_id: Option<Uuid>,
    state: &str,
    remaining_ms: Option<i64>,
) {
    let remaining_ms = remaining_ms.map(|ms| ms.clamp(0, MAX_REMAINING_MS));
    let now = sched.now();

    match state {
        "ended" => {
            on_playback_stopped(sched, guild_id, job_id, false).await;
        }
        // "playing", "paused", and any unrecognized value all take this
        // branch — unknown state values default to `playing`.
        _ => {
            let active = match sched.store().find_active_playing_job(guild_id).await {
                Ok(active) => active,
                Err(err) => {
                    warn!(guild_id, error = %err, "on_playback_state: find_active_playing_job failed");
                    return;
                }
            };
            let Some(active) = active else {
                return;
            };

            if let Err(err) = sched
                .store()
                .update_playback_snapshot(guild_id, active.id, remaining_ms, now)
                .await
            {
                warn!(guild_id, job_id = %active.id, error = %err, "on_playback_state: update_playback_snapshot failed");
            }

            let extend_ms = remaining_ms
                .unwrap_or(0)
                .max(sched.config().min_busy_lock_ms);
            let busy_until = now + ChronoDuration::milliseconds(extend_ms + sched.config().lock_padding_ms);
            if let Err(err) = sched.store().upsert_guild_busy_until(guild_id, Some(busy_until)).await {
                warn!(guild_id, error = %err, "on_playback_state: upsert_guild_busy_until failed");
            }

            if let Some(started_at) = active.started_at {
                let watchdog_at = started_at
                    + ChronoDuration::milliseconds(active.duration_sec as i64 * 1000 + sched.config().lock_padding_ms)
                    + ChronoDuration::seconds(sched.config().stale_grace_secs);
                dispatcher::spawn_timer_wait(sched, guild_id, TimerKind::Watchdog, watchdog_at, RunReason::Watchdog);
            }
        }
    }
}

/// `OnPlaybackStopped` / `OnManualStop`. Idempotent: calling twice for the
/// same `jobId` is equivalent to calling once, since `release_job` is
/// conditional on `status = PLAYING`.
pub(crate) async fn on_playback_stopped(
    sched: &Scheduler,
    guild_id: &str,
    job_id: Option<Uuid>,
    manual: bool,
) {
    let now = Utc::now();
    let target = match job_id {
        Some(id) => ReleaseTarget::Job(id),
        None => ReleaseTarget::AllPlayingInGuild,
    };

    match sched.store().release_job(guild_id, target, Terminal::Done, now).await {
        Ok(_) => {}
        Err(err) => {
            warn!(guild_id, error = %err, "on_playback_stopped: release_job failed");
            return;
        }
    }

    if let Err(err) = sched.store().upsert_guild_busy_until(guild_id, None).await {
        warn!(guild_id, error = %err, "on_playback_stopped: upsert_guild_busy_until failed");
    }

    if manual {
        sched.hub().emit_stop(guild_id, StopTarget::ManualStop).await;
    }

    let hint = match job_id {
        Some(id) => SelectionHint::just_finished(id),
        None => SelectionHint::default(),
    };
    dispatcher::run_guild(sched, guild_id, hint).await;
}
