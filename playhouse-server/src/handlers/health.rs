use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::infra::app_state::AppState;

pub async fn ping_handler() -> &'static str {
    "pong"
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

/// Checked via a cheap `ensure_guild` round trip rather than a dedicated
/// ping query, since the `Store` port has no health-check method of its own.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.store.list_guilds_with_active_work().await {
        Ok(_) => "ok",
        Err(_) => "unreachable",
    };

    Json(HealthResponse { status: "ok", database })
}
