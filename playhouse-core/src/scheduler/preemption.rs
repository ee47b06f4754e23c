use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{ReleaseTarget, SuspendData, Terminal};

use super::events::StopTarget;
use super::{dispatcher, RunReason, Scheduler, SelectionHint};

/// Suspends the currently PLAYING job into a PENDING resume child, then
/// dispatches the preempting job.
pub(crate) async fn preempt_with_job(sched: &Scheduler, guild_id: &str, preempting_job_id: Uuid) {
    // Step 1: confirm the preempting job still exists and is PENDING.
    match sched.store().find_pending_job_by_id(guild_id, preempting_job_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!(guild_id, job_id = %preempting_job_id, "preempt_with_job: preempting job no longer PENDING, no-op");
            return;
        }
        Err(err) => {
            warn!(guild_id, job_id = %preempting_job_id, error = %err, "preempt_with_job: lookup failed");
            return;
        }
    }

    // Step 2: observe active.
    let active = match sched.store().find_active_playing_job(guild_id).await {
        Ok(active) => active,
        Err(err) => {
            warn!(guild_id, error = %err, "preempt_with_job: find_active_playing_job failed");
            return;
        }
    };

    let Some(active) = active else {
        dispatcher::run_guild(sched, guild_id, SelectionHint::preferred(preempting_job_id)).await;
        return;
    };

    let now = sched.now();

    // Step 3: estimate remaining playtime of the active job.
    let remaining_ms = match (active.remaining_ms_snapshot, active.last_playback_state_at) {
        (Some(snapshot), Some(last_at))
            if (now - last_at) <= ChronoDuration::seconds(sched.config().snapshot_max_age_secs) =>
        {
            (snapshot - (now - last_at).num_milliseconds()).max(0)
        }
        _ => {
            let started_at = active.started_at.unwrap_or(now);
            (active.duration_sec as i64 * 1000 - (now - started_at).num_milliseconds()).max(0)
        }
    };

    if remaining_ms <= 0 {
        // Step 4: nothing left to preempt — release as DONE and dispatch fresh.
        match sched
            .store()
            .release_job(guild_id, ReleaseTarget::Job(active.id), Terminal::Done, now)
            .await
        {
            Ok(rows) if rows > 0 => {
                let _ = sched.store().upsert_guild_busy_until(guild_id, None).await;
                info!(guild_id, job_id = %active.id, "preempt_with_job: active job already finished, releasing before preemption");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(guild_id, job_id = %active.id, error = %err, "preempt_with_job: release_job failed");
                return;
            }
        }
        dispatcher::run_guild(sched, guild_id, SelectionHint::preferred(preempting_job_id)).await;
        return;
    }

    // Step 5: suspend the active job into a resume child.
    let remaining_sec = ((remaining_ms + 999) / 1000) as i32;
    let elapsed_sec = (active.duration_sec - remaining_sec).max(0);
    let next_offset = active.resume_offset_sec + elapsed_sec;

    let suspend = SuspendData {
        remaining_sec,
        preempting_id: preempting_job_id,
        next_offset,
    };
    match sched.store().suspend_for_preemption(active.id, guild_id, suspend).await {
        Ok(rows) if rows > 0 => {}
        Ok(_) => {
            warn!(guild_id, job_id = %active.id, "preempt_with_job: suspend_for_preemption affected 0 rows, state moved");
            dispatcher::run_guild(sched, guild_id, SelectionHint::default()).await;
            return;
        }
        Err(err) => {
            warn!(guild_id, job_id = %active.id, error = %err, "preempt_with_job: suspend_for_preemption failed");
            return;
        }
    }

    let _ = sched.store().upsert_guild_busy_until(guild_id, None).await;
    sched.hub().emit_stop(guild_id, StopTarget::Job(active.id)).await;
    info!(
        guild_id,
        suspended_job_id = %active.id,
        preempting_job_id = %preempting_job_id,
        remaining_sec,
        next_offset,
        "preempted"
    );

    // Step 6: dispatch the preempting job.
    dispatcher::run_guild(sched, guild_id, SelectionHint::preferred(preempting_job_id)).await;
}
