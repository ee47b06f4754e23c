use axum::extract::State;
use axum::Json;
use playhouse_core::model::CreateJobArgs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

/// A thin producer surface: validates and forwards to `create_job` +
/// `on_job_enqueued`. Contains no chat-platform logic.
#[derive(Debug, Deserialize)]
pub struct IngestJobRequest {
    pub guild_id: String,
    #[serde(default)]
    pub media_asset_id: Option<Uuid>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default = "default_show_text")]
    pub show_text: bool,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_image: Option<String>,
    #[serde(default)]
    pub duration_sec: Option<i32>,
    #[serde(default)]
    pub priority: Option<i32>,
}

fn default_show_text() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct IngestJobResponse {
    pub job_id: Uuid,
    pub guild_id: String,
    pub status: &'static str,
}

/// `POST /ingest/jobs`: creates a pending job and wakes its guild's
/// scheduler pass. Requires either a media asset or text — a job with
/// neither has nothing to play.
pub async fn create_job_handler(State(state): State<AppState>, Json(req): Json<IngestJobRequest>) -> AppResult<Json<IngestJobResponse>> {
    if req.media_asset_id.is_none() && req.text.is_none() {
        return Err(AppError::bad_request("job must carry a media_asset_id, text, or both"));
    }

    let guild = state
        .store
        .ensure_guild(&req.guild_id, state.config.default_duration_secs as i32)
        .await?;

    let duration_sec = guild.clamp_duration(req.duration_sec);

    let job = state
        .store
        .create_job(CreateJobArgs {
            guild_id: req.guild_id.clone(),
            media_asset_id: req.media_asset_id,
            text: req.text,
            show_text: req.show_text,
            author_name: req.author_name,
            author_image: req.author_image,
            duration_sec,
            priority: req.priority.unwrap_or(0),
        })
        .await?;

    state.scheduler.on_job_enqueued(req.guild_id);

    Ok(Json(IngestJobResponse { job_id: job.id, guild_id: job.guild_id, status: "pending" }))
}
