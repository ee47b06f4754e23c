use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Per-tenant watchdog/wake timers. Each tenant owns at most one of each;
/// arming replaces whatever was armed before. Cancellation is done with a
/// generation counter rather than an explicit cancel channel: arming bumps
/// the guild's generation, and a sleeping timer only fires if its captured
/// generation is still current when it wakes, without needing the timer
/// task itself to be reachable from the clearing call.
#[derive(Default)]
pub struct Timers {
    watchdog: DashMap<String, Arc<AtomicU64>>,
    wake: DashMap<String, Arc<AtomicU64>>,
}

pub enum TimerKind {
    Watchdog,
    Wake,
}

impl Timers {
    pub fn new() -> Self {
        Self {
            watchdog: DashMap::new(),
            wake: DashMap::new(),
        }
    }

    /// Arms `kind` for `guild_id` to fire at `fire_at`, invalidating any
    /// timer of the same kind previously armed for this guild. Returns the
    /// sleep future and a closure-friendly token the caller checks after
    /// waking to decide whether it is still the live timer.
    pub fn arm(&self, kind: &TimerKind, guild_id: &str, fire_at: DateTime<Utc>) -> TimerToken {
        let map = match kind {
            TimerKind::Watchdog => &self.watchdog,
            TimerKind::Wake => &self.wake,
        };
        let slot = map
            .entry(guild_id.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        let generation = slot.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(guild_id, generation, "timer armed");
        TimerToken {
            slot,
            generation,
            fire_at,
        }
    }

    /// Invalidates any timer of `kind` armed for `guild_id` without arming a
    /// replacement.
    pub fn clear(&self, kind: &TimerKind, guild_id: &str) {
        let map = match kind {
            TimerKind::Watchdog => &self.watchdog,
            TimerKind::Wake => &self.wake,
        };
        if let Some(slot) = map.get(guild_id) {
            slot.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct TimerToken {
    slot: Arc<AtomicU64>,
    generation: u64,
    fire_at: DateTime<Utc>,
}

impl TimerToken {
    /// Sleeps until `fire_at`, then reports whether this timer is still the
    /// live one for its guild (i.e. nothing re-armed or cleared it since).
    pub async fn wait(self) -> bool {
        let now = Utc::now();
        if self.fire_at > now {
            let delta = (self.fire_at - now)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(delta).await;
        }
        self.slot.load(Ordering::SeqCst) == self.generation
    }
}
