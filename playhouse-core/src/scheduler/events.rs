use serde::Serialize;
use uuid::Uuid;

/// Target of an `overlay:stop` event — a specific job, or the
/// `"manual-stop"` sentinel that means "everything this tenant is showing".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTarget {
    Job(Uuid),
    ManualStop,
}

impl StopTarget {
    pub fn as_job_id_string(&self) -> String {
        match self {
            StopTarget::Job(id) => id.to_string(),
            StopTarget::ManualStop => "manual-stop".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayMedia {
    pub asset_id: Uuid,
    pub url: String,
    pub mime: String,
    pub kind: &'static str,
    pub duration_sec: Option<i32>,
    pub is_vertical: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_offset_sec: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayText {
    pub value: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayAuthor {
    pub name: Option<String>,
    pub image: Option<String>,
    pub enabled: bool,
}

/// Payload of the `overlay:play` event. Built by the dispatch step and
/// handed to `OverlayHub::emit_play` unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct PlayEvent {
    pub job_id: Uuid,
    pub media: Option<PlayMedia>,
    pub text: PlayText,
    pub author: PlayAuthor,
    pub tweet_card: Option<serde_json::Value>,
    pub duration_sec: i32,
}
