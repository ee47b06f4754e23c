use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, ingest, media_stream, overlay_config, pairing};
use crate::infra::app_state::AppState;
use crate::websocket::handler::websocket_handler;

/// Assembles the full router: ambient health surface, overlay pairing/config/
/// media routes, the WebSocket upgrade, and the ingest producer surface.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(health::ping_handler))
        .route("/health", get(health::health_handler))
        .route("/overlay/ws", get(websocket_handler))
        .route("/overlay/config", get(overlay_config::overlay_config_handler))
        .route("/overlay/media/{asset_id}", get(media_stream::media_stream_handler))
        .route("/overlay/pair", post(pairing::issue_pairing_code))
        .route("/overlay/pair/consume", post(pairing::consume_pairing_code))
        .route("/ingest/jobs", post(ingest::create_job_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
