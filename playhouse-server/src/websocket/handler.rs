use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use playhouse_core::model::CreateJobArgs;

use crate::auth::hash_token;
use crate::infra::app_state::AppState;

use super::connection::OverlayConnection;
use super::messages::ClientEvent;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Upgrades the socket after a handshake auth check. Accepts the bearer
/// token from `auth.token` (an `Authorization: Bearer <token>` header) then
/// falls back to `?token=` on the query string, matching the precedence the
/// overlay clients use.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: axum::http::HeaderMap,
) -> Response {
    let token = bearer_from_headers(&headers).or(query.token);

    let Some(token) = token else {
        tracing::warn!("overlay handshake rejected: missing_token");
        return (axum::http::StatusCode::UNAUTHORIZED, "missing_token").into_response();
    };

    let token_hash = hash_token(&token);
    let client = match state.store.find_overlay_client_by_token_hash(&token_hash).await {
        Ok(Some(client)) if !client.is_revoked() => client,
        Ok(_) => {
            tracing::warn!("overlay handshake rejected: invalid_token");
            return (axum::http::StatusCode::UNAUTHORIZED, "invalid_token").into_response();
        }
        Err(err) => {
            tracing::warn!(error = %err, "overlay handshake rejected: auth_error");
            return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "auth_error").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, client))
}

fn bearer_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn handle_socket(socket: WebSocket, state: AppState, client: playhouse_core::model::OverlayClient) {
    use futures_util::{SinkExt, StreamExt};

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let conn = Arc::new(OverlayConnection::new(
        client.id,
        client.guild_id.clone(),
        client.label.clone(),
        client.default_author_name.clone(),
        client.default_author_image.clone(),
        tx,
    ));

    state.hub.add_connection(conn.clone());
    let _ = state.store.touch_overlay_client_last_seen(client.id, chrono::Utc::now()).await;
    state.scheduler.on_job_enqueued(client.guild_id.clone());
    state.hub.broadcast_peers(&client.guild_id).await;

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_client_event(&state, &conn, text.as_str()).await,
            Ok(Message::Binary(bytes)) => {
                if let Ok(text) = std::str::from_utf8(&bytes) {
                    handle_client_event(&state, &conn, text).await;
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => conn.touch_last_seen().await,
            Ok(Message::Close(_)) => break,
            Err(err) => {
                tracing::debug!(client_id = %conn.client_id, error = %err, "overlay socket error");
                break;
            }
        }
    }

    handle_disconnect(&state, &conn).await;
}

async fn handle_client_event(state: &AppState, conn: &OverlayConnection, raw: &str) {
    let event = match serde_json::from_str::<ClientEvent>(raw) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(client_id = %conn.client_id, error = %err, "ignoring malformed overlay event");
            return;
        }
    };

    match event {
        ClientEvent::Heartbeat { .. } => {
            conn.touch_last_seen().await;
            let _ = state.store.touch_overlay_client_last_seen(conn.client_id, chrono::Utc::now()).await;
        }
        ClientEvent::PlaybackState { job_id, state: playback_state, remaining_ms } => {
            let remaining_ms = remaining_ms.map(|ms| ms.clamp(0, 24 * 60 * 60 * 1000));
            state.scheduler.on_playback_state(conn.guild_id.clone(), job_id, playback_state, remaining_ms);
        }
        ClientEvent::Stop { job_id } => match job_id.as_deref() {
            Some("manual-stop") => state.scheduler.on_manual_stop(conn.guild_id.clone()),
            Some(raw_id) => {
                let job_id = Uuid::parse_str(raw_id).ok();
                state.scheduler.on_playback_stopped(conn.guild_id.clone(), job_id);
            }
            None => state.scheduler.on_playback_stopped(conn.guild_id.clone(), None),
        },
        ClientEvent::MemeTrigger { item_id, .. } => handle_meme_trigger(state, conn, item_id).await,
        ClientEvent::Error { job_id, code, message } => {
            tracing::warn!(client_id = %conn.client_id, guild_id = %conn.guild_id, ?job_id, ?code, ?message, "overlay reported error");
        }
    }
}

async fn handle_meme_trigger(state: &AppState, conn: &OverlayConnection, item_id: Uuid) {
    let item = match state.store.get_meme_board_item(&conn.guild_id, item_id).await {
        Ok(Some(item)) => item,
        Ok(None) => {
            tracing::info!(guild_id = %conn.guild_id, %item_id, "meme-trigger: unknown item, no job created");
            return;
        }
        Err(err) => {
            tracing::warn!(guild_id = %conn.guild_id, error = %err, "meme-trigger: get_meme_board_item failed");
            return;
        }
    };

    let asset = match state.store.get_media_asset(item.media_asset_id).await {
        Ok(Some(asset)) if asset.is_ready() => asset,
        Ok(_) => {
            tracing::info!(guild_id = %conn.guild_id, %item_id, "meme-trigger: asset not READY, no job created");
            return;
        }
        Err(err) => {
            tracing::warn!(guild_id = %conn.guild_id, error = %err, "meme-trigger: get_media_asset failed");
            return;
        }
    };

    let guild = match state.store.ensure_guild(&conn.guild_id, state.config.default_duration_secs as i32).await {
        Ok(guild) => guild,
        Err(err) => {
            tracing::warn!(guild_id = %conn.guild_id, error = %err, "meme-trigger: ensure_guild failed");
            return;
        }
    };

    let duration_sec = guild.clamp_duration(asset.duration_sec);
    let job = state
        .store
        .create_job(CreateJobArgs {
            guild_id: conn.guild_id.clone(),
            media_asset_id: Some(asset.id),
            text: None,
            show_text: false,
            author_name: conn.author_name.clone(),
            author_image: conn.author_image.clone(),
            duration_sec,
            priority: state.config.meme_job_priority,
        })
        .await;

    match job {
        Ok(job) => state.scheduler.preempt_with_job(conn.guild_id.clone(), job.id),
        Err(err) => tracing::warn!(guild_id = %conn.guild_id, error = %err, "meme-trigger: create_job failed"),
    }
}

async fn handle_disconnect(state: &AppState, conn: &OverlayConnection) {
    let Some((guild_id, room_now_empty)) = state.hub.remove_connection(conn.client_id) else {
        return;
    };
    if room_now_empty {
        let _ = state.store.upsert_guild_busy_until(&guild_id, None).await;
    } else {
        state.hub.broadcast_peers(&guild_id).await;
    }
}
