//! Domain crate for the playback scheduler: entities, the `Store` port and
//! its Postgres adapter, the scheduler itself, the `OverlayHub` port, the
//! rich-text payload codec, configuration, and the purge worker. The HTTP/WS
//! edge lives in `playhouse-server`, which depends on this crate.

pub mod config;
pub mod error;
pub mod model;
pub mod purge;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use error::{Result, SchedulerError, StoreError, StoreResult};
pub use scheduler::{OverlayHub, Scheduler};
pub use store::Store;
