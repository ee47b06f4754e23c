//! Rich overlay text payload codec.
//!
//! The job `text` column carries either a plain string or an opaque
//! base64+JSON blob describing structured data (a tweet card, or a media
//! item with its own start offset): a tagged variant serialized to a single
//! text column, with decoders that tolerate plain strings that don't start
//! with the sentinel prefix.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

const SENTINEL: &str = "rtxt1:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RichPayload {
    Plain {
        value: String,
    },
    Tweet {
        value: String,
        author: String,
        handle: String,
        avatar_url: Option<String>,
    },
    Media {
        value: String,
        /// Legacy media start offset in seconds, adopted by the dispatch
        /// step when the job's own `resume_offset_sec` is zero.
        offset_sec: Option<i32>,
    },
}

impl RichPayload {
    pub fn plain(value: impl Into<String>) -> Self {
        RichPayload::Plain { value: value.into() }
    }

    pub fn display_value(&self) -> &str {
        match self {
            RichPayload::Plain { value } => value,
            RichPayload::Tweet { value, .. } => value,
            RichPayload::Media { value, .. } => value,
        }
    }

    pub fn legacy_offset_sec(&self) -> Option<i32> {
        match self {
            RichPayload::Media { offset_sec, .. } => *offset_sec,
            _ => None,
        }
    }

    /// Encoding then decoding is the identity.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("RichPayload always serializes");
        format!("{SENTINEL}{}", STANDARD.encode(json))
    }

    /// Tolerates plain strings that don't start with the sentinel: they
    /// decode to `Plain`.
    pub fn decode(raw: &str) -> Self {
        let Some(encoded) = raw.strip_prefix(SENTINEL) else {
            return RichPayload::plain(raw);
        };
        let Ok(bytes) = STANDARD.decode(encoded) else {
            return RichPayload::plain(raw);
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|_| RichPayload::plain(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_round_trips_as_plain() {
        let decoded = RichPayload::decode("just some chat text");
        assert_eq!(decoded, RichPayload::plain("just some chat text"));
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let original = RichPayload::Tweet {
            value: "hello world".into(),
            author: "Ada".into(),
            handle: "@ada".into(),
            avatar_url: Some("https://example.com/a.png".into()),
        };
        let encoded = original.encode();
        assert!(encoded.starts_with(SENTINEL));
        assert_eq!(RichPayload::decode(&encoded), original);
    }

    #[test]
    fn media_offset_is_only_present_on_media_variant() {
        let media = RichPayload::Media {
            value: String::new(),
            offset_sec: Some(12),
        };
        assert_eq!(media.legacy_offset_sec(), Some(12));
        assert_eq!(RichPayload::plain("x").legacy_offset_sec(), None);
    }

    #[test]
    fn corrupt_sentinel_payload_falls_back_to_plain() {
        let raw = format!("{SENTINEL}not-valid-base64!!!");
        let decoded = RichPayload::decode(&raw);
        assert_eq!(decoded, RichPayload::plain(raw.as_str()));
    }
}
