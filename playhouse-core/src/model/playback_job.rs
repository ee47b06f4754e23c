use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Playing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// The scheduler's unit of work. Created by a producer, consumed by
/// overlays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlaybackJob {
    pub id: Uuid,
    pub guild_id: String,
    pub media_asset_id: Option<Uuid>,
    pub text: Option<String>,
    pub show_text: bool,
    pub author_name: Option<String>,
    pub author_image: Option<String>,

    pub duration_sec: i32,
    pub priority: i32,

    pub status: JobStatus,
    pub finished_at: Option<DateTime<Utc>>,

    /// Monotonic enqueue time, used as the FIFO tie-break.
    pub submission_date: DateTime<Utc>,
    /// Earliest time this root job may dispatch.
    pub execution_date: DateTime<Utc>,
    /// Mirrors `execution_date`; kept as a distinct column for producers that
    /// only ever set a schedule time and never touch execution ordering.
    pub scheduled_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,
    pub remaining_ms_snapshot: Option<i64>,
    pub last_playback_state_at: Option<DateTime<Utc>>,

    /// Non-null => this job is the resumed tail of a preempted job.
    pub resumes_after_job_id: Option<Uuid>,
    /// Seconds of media already consumed before this resume; monotonic
    /// non-decreasing across repeated preemptions.
    pub resume_offset_sec: i32,
}

impl PlaybackJob {
    pub fn is_root(&self) -> bool {
        self.resumes_after_job_id.is_none()
    }

    /// `(priority DESC, submission_date ASC, id ASC)`.
    pub fn priority_key(&self) -> (std::cmp::Reverse<i32>, DateTime<Utc>, Uuid) {
        (std::cmp::Reverse(self.priority), self.submission_date, self.id)
    }
}

/// Fields written by `PromoteToPlaying`.
#[derive(Debug, Clone)]
pub struct PromoteData {
    pub started_at: DateTime<Utc>,
    pub effective_duration_sec: i32,
    pub resume_offset_sec: i32,
}

/// Fields written by `SuspendForPreemption`.
#[derive(Debug, Clone)]
pub struct SuspendData {
    pub remaining_sec: i32,
    pub preempting_id: Uuid,
    pub next_offset: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Done,
    Failed,
}

impl Terminal {
    pub fn as_status(self) -> JobStatus {
        match self {
            Terminal::Done => JobStatus::Done,
            Terminal::Failed => JobStatus::Failed,
        }
    }
}

/// Targets of `ReleaseJob` / reconciliation — a specific job, or every
/// PLAYING job for this guild (the over-release mode used when a stop event
/// arrives with no resolvable job id; opt-in per call site).
#[derive(Debug, Clone, Copy)]
pub enum ReleaseTarget {
    Job(Uuid),
    AllPlayingInGuild,
}

#[derive(Debug, Clone)]
pub struct CreateJobArgs {
    pub guild_id: String,
    pub media_asset_id: Option<Uuid>,
    pub text: Option<String>,
    pub show_text: bool,
    pub author_name: Option<String>,
    pub author_image: Option<String>,
    pub duration_sec: i32,
    pub priority: i32,
}
