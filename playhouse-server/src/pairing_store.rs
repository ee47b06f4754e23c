//! One-shot pairing-code store backed by Redis: `POST /overlay/pair/consume`
//! exchanges a short code (issued out-of-band, e.g. shown on an overlay's
//! setup screen) for a client token exactly once. `SETEX` gives the code a
//! bounded lifetime without a background sweep; consumption is a Lua
//! `GET`-then-`DEL` so two racing consumers can't both win.

use std::fmt;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPairing {
    pub guild_id: String,
    pub label: String,
}

#[derive(Clone)]
pub struct PairingStore {
    conn: ConnectionManager,
}

impl fmt::Debug for PairingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingStore").field("connection", &"ConnectionManager").finish()
    }
}

const CONSUME_SCRIPT: &str = r#"
local value = redis.call("GET", KEYS[1])
if value then
    redis.call("DEL", KEYS[1])
end
return value
"#;

impl PairingStore {
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn key(code: &str) -> String {
        format!("playhouse:pairing:{code}")
    }

    pub async fn issue(&self, code: &str, pending: &PendingPairing, ttl: Duration) -> redis::RedisResult<()> {
        let json = serde_json::to_string(pending)
            .expect("PendingPairing always serializes");
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::key(code), json, ttl.as_secs().max(1)).await
    }

    /// Atomically consumes `code`; returns `None` if it never existed or
    /// was already consumed (or has expired).
    pub async fn consume(&self, code: &str) -> redis::RedisResult<Option<PendingPairing>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = Script::new(CONSUME_SCRIPT)
            .key(Self::key(code))
            .invoke_async(&mut conn)
            .await?;
        Ok(raw.and_then(|json| serde_json::from_str(&json).ok()))
    }
}
