use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{MediaAsset, PlaybackJob, PromoteData, ReleaseTarget, RichPayload, Terminal};

use super::events::{PlayAuthor, PlayEvent, PlayMedia, PlayText};
use super::timers::TimerKind;
use super::{RunReason, Scheduler, SelectionHint};

/// Outcome of one dispatch attempt.
enum DispatchOutcome {
    Dispatched,
    Idle,
    Retry,
}

/// `runGuild`: advances a tenant's state machine until it either has a
/// PLAYING job or has quiesced. Bounded to `guild_run_max_iterations` to
/// guard against unbounded recursion from malformed data.
pub(crate) async fn run_guild(sched: &Scheduler, guild_id: &str, hint: SelectionHint) {
    let mut hint = hint;
    let max_iterations = sched.config().guild_run_max_iterations;

    for _ in 0..max_iterations {
        let now = sched.now();

        // Step 1-2: observe active, handle stale release.
        let active = match sched.store().find_active_playing_job(guild_id).await {
            Ok(active) => active,
            Err(err) => {
                warn!(guild_id, error = %err, "run_guild: find_active_playing_job failed");
                return;
            }
        };

        if let Some(active) = active {
            let expected_end = active.started_at.unwrap_or(active.submission_date)
                + ChronoDuration::seconds(active.duration_sec as i64)
                + ChronoDuration::milliseconds(sched.config().lock_padding_ms);
            let stale_at = expected_end + ChronoDuration::seconds(sched.config().stale_grace_secs);

            if now >= stale_at {
                let released = sched
                    .store()
                    .release_job(guild_id, ReleaseTarget::Job(active.id), Terminal::Done, now)
                    .await;
                match released {
                    Ok(rows) if rows > 0 => {
                        warn!(guild_id, job_id = %active.id, "watchdog-equivalent stale release during runGuild");
                        let _ = sched.store().upsert_guild_busy_until(guild_id, None).await;
                        hint = SelectionHint::just_finished(active.id);
                        continue;
                    }
                    Ok(_) => {
                        // Already released by a racing watchdog/reconciler; re-observe.
                        continue;
                    }
                    Err(err) => {
                        warn!(guild_id, error = %err, "run_guild: stale release failed");
                        return;
                    }
                }
            }

            spawn_timer_wait(sched, guild_id, TimerKind::Watchdog, stale_at, RunReason::Watchdog);

            if let Err(err) = sched
                .store()
                .recompute_root_execution_dates(guild_id, expected_end, sched.config().lock_padding_ms)
                .await
            {
                warn!(guild_id, error = %err, "run_guild: recompute_root_execution_dates failed");
            }
            return;
        }

        // Step 3: no active job.
        sched.timers().clear(&TimerKind::Watchdog, guild_id);
        let _ = sched.store().upsert_guild_busy_until(guild_id, None).await;

        // Step 4: select next.
        let next = match select_next(sched, guild_id, &hint, now).await {
            Ok(next) => next,
            Err(()) => return,
        };

        let Some(next) = next else {
            // Step 5: nothing eligible — recompute, arm wake timer, return.
            if let Err(err) = sched
                .store()
                .recompute_root_execution_dates(guild_id, now, sched.config().lock_padding_ms)
                .await
            {
                warn!(guild_id, error = %err, "run_guild: recompute_root_execution_dates failed");
            }
            match sched.store().find_earliest_pending_root(guild_id).await {
                Ok(Some(root)) => {
                    spawn_timer_wait(sched, guild_id, TimerKind::Wake, root.execution_date, RunReason::Wake);
                }
                Ok(None) => sched.timers().clear(&TimerKind::Wake, guild_id),
                Err(err) => warn!(guild_id, error = %err, "run_guild: failed to find next pending root for wake timer"),
            }
            return;
        };

        // Step 6: dispatch.
        match dispatch_step(sched, guild_id, &next, now).await {
            DispatchOutcome::Dispatched | DispatchOutcome::Idle => return,
            DispatchOutcome::Retry => {
                hint = SelectionHint::default();
                continue;
            }
        }
    }

    tracing::error!(
        guild_id,
        iterations = max_iterations,
        "runGuild exceeded max iterations; tenant left quiesced"
    );
}

/// Selection order: preferred job, then resume child of the job that just
/// finished, then any orphaned resume child, then the next PENDING root.
async fn select_next(
    sched: &Scheduler,
    guild_id: &str,
    hint: &SelectionHint,
    now: DateTime<Utc>,
) -> Result<Option<PlaybackJob>, ()> {
    if let Some(preferred) = hint.preferred_job_id {
        match sched.store().find_pending_job_by_id(guild_id, preferred).await {
            Ok(Some(job)) => return Ok(Some(job)),
            Ok(None) => {} // no longer eligible, fall through
            Err(err) => {
                warn!(guild_id, error = %err, "select_next: find_pending_job_by_id failed");
                return Err(());
            }
        }
    }

    if let Some(parent_id) = hint.just_finished_job_id {
        match sched.store().find_resumed_child_of(guild_id, parent_id).await {
            Ok(Some(child)) => return Ok(Some(child)),
            Ok(None) => {}
            Err(err) => {
                warn!(guild_id, error = %err, "select_next: find_resumed_child_of failed");
                return Err(());
            }
        }
    }

    match sched.store().find_orphaned_resumed_children(guild_id).await {
        Ok(mut orphans) if !orphans.is_empty() => return Ok(Some(orphans.remove(0))),
        Ok(_) => {}
        Err(err) => {
            warn!(guild_id, error = %err, "select_next: find_orphaned_resumed_children failed");
            return Err(());
        }
    }

    match sched.store().find_next_pending_root(guild_id, now).await {
        Ok(next) => Ok(next),
        Err(err) => {
            warn!(guild_id, error = %err, "select_next: find_next_pending_root failed");
            Err(())
        }
    }
}

/// The dispatch step, given a PENDING job already selected.
async fn dispatch_step(
    sched: &Scheduler,
    guild_id: &str,
    next: &PlaybackJob,
    now: DateTime<Utc>,
) -> DispatchOutcome {
    // Step 1: resolve media.
    let media: Option<MediaAsset> = if let Some(asset_id) = next.media_asset_id {
        match sched.store().get_media_asset(asset_id).await {
            Ok(Some(asset)) if asset.is_ready() => Some(asset),
            Ok(_) => {
                warn!(guild_id, job_id = %next.id, "dispatch: media asset missing or not READY, failing job");
                fail_job(sched, guild_id, next.id).await;
                return DispatchOutcome::Retry;
            }
            Err(err) => {
                warn!(guild_id, job_id = %next.id, error = %err, "dispatch: get_media_asset failed");
                return DispatchOutcome::Idle;
            }
        }
    } else {
        None
    };

    // Step 2: resolve audience.
    let room_size = sched.hub().room_size(guild_id).await;
    if room_size == 0 {
        info!(guild_id, job_id = %next.id, "dispatch: no overlay connected, failing job");
        fail_job(sched, guild_id, next.id).await;
        return DispatchOutcome::Retry;
    }

    // Step 3: resolve start offset / legacy media offset.
    let rich = next.text.as_deref().map(RichPayload::decode);
    let mut start_offset_sec = next.resume_offset_sec.max(0);
    let mut effective_duration_sec = next.duration_sec;
    if start_offset_sec == 0 {
        if let Some(legacy_offset) = rich.as_ref().and_then(RichPayload::legacy_offset_sec) {
            if legacy_offset > 0 {
                start_offset_sec = legacy_offset;
                effective_duration_sec = (next.duration_sec - legacy_offset).max(1);
            }
        }
    }

    // Step 4: atomic promotion.
    let promote = PromoteData {
        started_at: now,
        effective_duration_sec,
        resume_offset_sec: start_offset_sec,
    };
    match sched.store().promote_to_playing(next.id, guild_id, promote).await {
        Ok(rows) if rows > 0 => {}
        Ok(_) => return DispatchOutcome::Retry,
        Err(err) => {
            warn!(guild_id, job_id = %next.id, error = %err, "dispatch: promote_to_playing failed");
            return DispatchOutcome::Idle;
        }
    }

    // Step 5: busy-lock.
    let busy_until =
        now + ChronoDuration::milliseconds(effective_duration_sec as i64 * 1000 + sched.config().lock_padding_ms);
    if let Err(err) = sched.store().upsert_guild_busy_until(guild_id, Some(busy_until)).await {
        warn!(guild_id, job_id = %next.id, error = %err, "dispatch: upsert_guild_busy_until failed");
    }

    // Step 6: emit PLAY.
    let event = build_play_event(sched, next, media.as_ref(), rich.as_ref(), start_offset_sec, effective_duration_sec);
    sched.hub().emit_play(guild_id, event).await;
    info!(guild_id, job_id = %next.id, effective_duration_sec, start_offset_sec, "dispatched");

    // Step 7: arm watchdog.
    let watchdog_at = now
        + ChronoDuration::milliseconds(effective_duration_sec as i64 * 1000 + sched.config().lock_padding_ms)
        + ChronoDuration::seconds(sched.config().stale_grace_secs);
    spawn_timer_wait(sched, guild_id, TimerKind::Watchdog, watchdog_at, RunReason::Watchdog);

    // Step 8: recompute execution dates.
    let anchor = now + ChronoDuration::milliseconds(effective_duration_sec as i64 * 1000 + sched.config().lock_padding_ms);
    if let Err(err) = sched
        .store()
        .recompute_root_execution_dates(guild_id, anchor, sched.config().lock_padding_ms)
        .await
    {
        warn!(guild_id, error = %err, "dispatch: recompute_root_execution_dates failed");
    }

    DispatchOutcome::Dispatched
}

async fn fail_job(sched: &Scheduler, guild_id: &str, job_id: Uuid) {
    if let Err(err) = sched.store().fail_pending_job(guild_id, job_id, Utc::now()).await {
        warn!(guild_id, job_id = %job_id, error = %err, "fail_job: failed to mark job FAILED");
    }
}

fn build_play_event(
    sched: &Scheduler,
    job: &PlaybackJob,
    media: Option<&MediaAsset>,
    rich: Option<&RichPayload>,
    start_offset_sec: i32,
    effective_duration_sec: i32,
) -> PlayEvent {
    let play_media = media.map(|asset| {
        let mut url = format!("{}/overlay/media/{}", sched.config().api_url, asset.id);
        if start_offset_sec > 0 {
            url = format!("{url}?startOffsetSec={start_offset_sec}#t={start_offset_sec}");
        }
        PlayMedia {
            asset_id: asset.id,
            url,
            mime: asset.mime.clone(),
            kind: match asset.kind {
                crate::model::MediaKind::Image => "image",
                crate::model::MediaKind::Audio => "audio",
                crate::model::MediaKind::Video => "video",
            },
            duration_sec: asset.duration_sec,
            is_vertical: asset.is_vertical,
            start_offset_sec: (start_offset_sec > 0).then_some(start_offset_sec),
        }
    });

    let display_value = rich
        .map(|r| r.display_value().to_string())
        .or_else(|| job.text.clone())
        .unwrap_or_default();
    let tweet_card = rich.and_then(|r| match r {
        RichPayload::Tweet { author, handle, avatar_url, .. } => Some(serde_json::json!({
            "author": author,
            "handle": handle,
            "avatarUrl": avatar_url,
        })),
        _ => None,
    });

    PlayEvent {
        job_id: job.id,
        media: play_media,
        text: PlayText {
            value: display_value,
            enabled: job.show_text,
        },
        author: PlayAuthor {
            name: job.author_name.clone(),
            image: job.author_image.clone(),
            enabled: job.author_name.is_some(),
        },
        tweet_card,
        duration_sec: effective_duration_sec,
    }
}

pub(crate) fn spawn_timer_wait(
    sched: &Scheduler,
    guild_id: &str,
    kind: TimerKind,
    fire_at: DateTime<Utc>,
    reason: RunReason,
) {
    let token = sched.timers().arm(&kind, guild_id, fire_at);
    let sched = sched.clone();
    let guild_id = guild_id.to_string();
    tokio::spawn(async move {
        if token.wait().await {
            sched.trigger_timer(guild_id, reason);
        }
    });
}
