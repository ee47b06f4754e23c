use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::Serialize;

use crate::auth::hash_token;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::websocket::messages::PROTOCOL_VERSION;

#[derive(Debug, Serialize)]
pub struct OverlayConfigResponse {
    pub guild_id: String,
    pub protocol_version: &'static str,
    pub show_text_default: bool,
    pub default_media_time: i32,
    pub max_media_time: Option<i32>,
}

/// `GET /overlay/config`: authenticated bearer → the tenant's overlay
/// policy, so a freshly paired client can render before its first PLAY.
pub async fn overlay_config_handler(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<OverlayConfigResponse>> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;

    let client = state
        .store
        .find_overlay_client_by_token_hash(&hash_token(token))
        .await?
        .filter(|c| !c.is_revoked())
        .ok_or_else(|| AppError::unauthorized("invalid or revoked token"))?;

    let guild = state
        .store
        .ensure_guild(&client.guild_id, state.config.default_duration_secs as i32)
        .await?;

    Ok(Json(OverlayConfigResponse {
        guild_id: client.guild_id,
        protocol_version: PROTOCOL_VERSION,
        show_text_default: true,
        default_media_time: guild.default_media_time_secs,
        max_media_time: guild.max_media_time_secs,
    }))
}
