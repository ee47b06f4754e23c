use serde::{Deserialize, Serialize};
use uuid::Uuid;

use playhouse_core::scheduler::{PlayAuthor, PlayEvent, PlayMedia, PlayText};

pub const PROTOCOL_VERSION: &str = "1.0";

/// Server → client events. Tagged on `event`, matching the wire names in the
/// overlay protocol (`overlay:play`, `overlay:stop`, `overlay:peers`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename = "overlay:play")]
    Play {
        #[serde(flatten)]
        payload: PlayEventPayload,
    },
    #[serde(rename = "overlay:stop")]
    Stop { job_id: String },
    #[serde(rename = "overlay:peers")]
    Peers { guild_id: String, peers: Vec<Peer> },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayEventPayload {
    pub job_id: Uuid,
    pub media: Option<PlayMedia>,
    pub text: PlayText,
    pub author: PlayAuthor,
    pub tweet_card: Option<serde_json::Value>,
    pub duration_sec: i32,
    pub protocol_version: &'static str,
}

impl From<PlayEvent> for PlayEventPayload {
    fn from(event: PlayEvent) -> Self {
        Self {
            job_id: event.job_id,
            media: event.media,
            text: event.text,
            author: event.author,
            tweet_card: event.tweet_card,
            duration_sec: event.duration_sec,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub client_id: Uuid,
    pub label: String,
}

/// Client → server events, matched duck-typed: unknown shapes are rejected,
/// unknown enum values coerce to a documented default rather than erroring.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename = "overlay:heartbeat")]
    Heartbeat {
        #[serde(default)]
        app_version: Option<String>,
    },
    #[serde(rename = "overlay:playback-state")]
    PlaybackState {
        job_id: Option<Uuid>,
        #[serde(default = "default_playback_state")]
        state: String,
        #[serde(default)]
        remaining_ms: Option<i64>,
    },
    #[serde(rename = "overlay:stop")]
    Stop { job_id: Option<String> },
    #[serde(rename = "overlay:meme-trigger")]
    MemeTrigger {
        item_id: Uuid,
        #[serde(default)]
        trigger: Option<String>,
    },
    #[serde(rename = "overlay:error")]
    Error {
        job_id: Option<Uuid>,
        code: Option<String>,
        message: Option<String>,
    },
}

fn default_playback_state() -> String {
    "playing".to_string()
}
