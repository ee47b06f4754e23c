use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::{generate_pairing_code, generate_token, hash_token};
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};
use crate::pairing_store::PendingPairing;

#[derive(Debug, Deserialize)]
pub struct IssuePairingRequest {
    pub guild_id: String,
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct IssuePairingResponse {
    pub code: String,
    pub expires_in_minutes: u32,
}

/// Issues a one-shot pairing code for `(guildId, label)`, shown out-of-band
/// to whoever is setting up the overlay. Not part of the overlay wire
/// protocol itself — a thin producer-facing helper so `/overlay/pair/consume`
/// has something to consume in an end-to-end setup.
pub async fn issue_pairing_code(
    State(state): State<AppState>,
    Json(req): Json<IssuePairingRequest>,
) -> AppResult<Json<IssuePairingResponse>> {
    let code = generate_pairing_code();
    let ttl = Duration::from_secs(state.config.pairing_code_ttl_minutes as u64 * 60);
    state
        .pairing
        .issue(&code, &PendingPairing { guild_id: req.guild_id, label: req.label }, ttl)
        .await?;

    Ok(Json(IssuePairingResponse { code, expires_in_minutes: state.config.pairing_code_ttl_minutes }))
}

#[derive(Debug, Deserialize)]
pub struct ConsumePairingRequest {
    pub code: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConsumePairingResponse {
    pub token: String,
    pub client_id: uuid::Uuid,
    pub guild_id: String,
}

/// `POST /overlay/pair/consume`: exchanges a one-shot code for a client
/// token, revoking any prior token for the same `(guildId, label)`.
pub async fn consume_pairing_code(
    State(state): State<AppState>,
    Json(req): Json<ConsumePairingRequest>,
) -> AppResult<Json<ConsumePairingResponse>> {
    let pending = state
        .pairing
        .consume(&req.code)
        .await?
        .ok_or_else(|| AppError::gone("pairing code already used, expired, or unknown"))?;

    state
        .store
        .ensure_guild(&pending.guild_id, state.config.default_duration_secs as i32)
        .await?;

    let label = req.device_name.unwrap_or(pending.label);
    let token = generate_token();
    let client = state
        .store
        .create_overlay_client(&pending.guild_id, &label, &hash_token(&token), None, None)
        .await?;

    Ok(Json(ConsumePairingResponse { token, client_id: client.id, guild_id: client.guild_id }))
}
