use std::env;
use std::time::Duration;

use tracing::warn;

/// Env-style configuration, loaded once at bootstrap and shared read-only
/// thereafter: gather env vars with typed defaults, warn on nonsensical
/// combinations instead of failing hard.
#[derive(Debug, Clone)]
pub struct Config {
    pub default_duration_secs: u32,
    pub pairing_code_ttl_minutes: u32,
    pub playback_job_retention_hours: u32,
    pub media_cache_ttl_hours: u32,
    pub api_url: String,
    pub log: String,
    pub database_url: String,

    /// Scheduler-internal timing constants, exposed as config so integration
    /// tests can use much shorter timeouts.
    pub lock_padding_ms: i64,
    pub stale_grace_secs: i64,
    pub min_busy_lock_ms: i64,
    pub snapshot_max_age_secs: i64,
    pub guild_run_max_iterations: u32,
    pub meme_job_priority: i32,

    pub server_host: String,
    pub server_port: u16,
    pub purge_interval_secs: u64,
}

impl Config {
    /// Loads configuration from the process environment, applying a
    /// best-effort `.env` read first.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(dotenvy::Error::Io(_)) => {}
            Err(err) => warn!("failed to parse .env file: {err}"),
        }
        Self::from_env()
    }

    fn from_env() -> Self {
        let mut cfg = Self {
            default_duration_secs: env_u32("DEFAULT_DURATION", 30),
            pairing_code_ttl_minutes: env_u32("PAIRING_CODE_TTL_MINUTES", 10),
            playback_job_retention_hours: env_u32("PLAYBACK_JOB_RETENTION_HOURS", 72),
            media_cache_ttl_hours: env_u32("MEDIA_CACHE_TTL_HOURS", 720),
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            log: env::var("LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: env::var("DATABASE_URL").unwrap_or_default(),
            lock_padding_ms: env_i64("LOCK_PADDING_MS", 250),
            stale_grace_secs: env_i64("STALE_GRACE_SECS", 10),
            min_busy_lock_ms: env_i64("MIN_BUSY_LOCK_MS", 5_000),
            snapshot_max_age_secs: env_i64("SNAPSHOT_MAX_AGE_SECS", 15),
            guild_run_max_iterations: env_u32("GUILD_RUN_MAX_ITERATIONS", 25),
            meme_job_priority: env_i64("MEME_JOB_PRIORITY", 100) as i32,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env_u32("SERVER_PORT", 8080) as u16,
            purge_interval_secs: env_u32("PURGE_INTERVAL_SECS", 60) as u64,
        };
        cfg.warn_on_suspicious_values();
        cfg.default_duration_secs = cfg.default_duration_secs.max(1);
        cfg
    }

    fn warn_on_suspicious_values(&self) {
        if self.default_duration_secs == 0 {
            warn!("DEFAULT_DURATION=0 is invalid; jobs require durationSec >= 1, falling back to 1");
        }
        if self.database_url.is_empty() {
            warn!("DATABASE_URL is not set; the server will fail to connect at bootstrap");
        }
    }

    pub fn watchdog_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs.max(0) as u64)
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
