pub mod health;
pub mod ingest;
pub mod media_stream;
pub mod overlay_config;
pub mod pairing;
