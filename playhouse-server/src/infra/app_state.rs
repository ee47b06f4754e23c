use std::fmt;
use std::sync::Arc;

use playhouse_core::{Config, Scheduler, Store};

use crate::pairing_store::PairingStore;
use crate::websocket::manager::ConnectionManager;

/// Shared server state: the scheduler handle (which itself owns the store
/// and hub ports), plus the concrete store/hub Arcs the HTTP handlers need
/// directly for reads the scheduler doesn't expose, and the one-shot
/// pairing-code store.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub store: Arc<dyn Store>,
    pub hub: Arc<ConnectionManager>,
    pub config: Arc<Config>,
    pub pairing: Arc<PairingStore>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
