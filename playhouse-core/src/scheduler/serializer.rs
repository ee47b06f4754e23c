use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// How long a tenant's queue sits idle before its actor retires and its map
/// entry is removed.
const IDLE_RETIREMENT: Duration = Duration::from_secs(5);

/// Per-tenant FIFO task queue. Tasks for the same `guild_id` run strictly
/// sequentially in submission order; tasks for different guilds run
/// concurrently. A task failure is caught and logged by the task itself (it
/// is an infallible `Future<Output = ()>`) — it never poisons the queue, so
/// the next task always runs.
#[derive(Clone, Default)]
pub struct PerTenantSerializer {
    queues: DashMap<String, mpsc::UnboundedSender<Task>>,
}

impl PerTenantSerializer {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    /// Enqueues `task` for `guild_id`. Returns immediately; the task itself
    /// runs on the tenant's actor, strictly after every task submitted for
    /// the same guild before it.
    pub fn submit<F, Fut>(&self, guild_id: impl Into<String>, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let guild_id = guild_id.into();
        let mut boxed: Task = Box::pin(task());

        loop {
            if let Some(sender) = self.queues.get(&guild_id) {
                match sender.send(boxed) {
                    Ok(()) => return,
                    Err(mpsc::error::SendError(returned)) => {
                        // The actor just retired; fall through and spawn a
                        // fresh one for this guild.
                        boxed = returned;
                    }
                }
            }

            let (tx, rx) = mpsc::unbounded_channel::<Task>();
            match self.queues.entry(guild_id.clone()) {
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    entry.insert(tx.clone());
                    let queues = self.queues.clone();
                    let actor_guild_id = guild_id.clone();
                    tokio::spawn(run_actor(queues, actor_guild_id, tx, rx));
                    continue;
                }
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    // Another submit() beat us to spawning the actor.
                    continue;
                }
            }
        }
    }

    /// Number of guilds with a live actor. Diagnostic only.
    pub fn active_guild_count(&self) -> usize {
        self.queues.len()
    }
}

async fn run_actor(
    queues: DashMap<String, mpsc::UnboundedSender<Task>>,
    guild_id: String,
    tx: mpsc::UnboundedSender<Task>,
    mut rx: mpsc::UnboundedReceiver<Task>,
) {
    loop {
        match tokio::time::timeout(IDLE_RETIREMENT, rx.recv()).await {
            Ok(Some(task)) => {
                task.await;
            }
            Ok(None) => break,
            Err(_elapsed) => {
                // Idle. Retire iff we are still the registered sender for
                // this guild; a submit() racing right now either lands in
                // the channel before we remove the entry (drained below) or
                // finds the entry gone and spawns a replacement actor.
                let removed = queues
                    .remove_if(&guild_id, |_, registered| registered.same_channel(&tx))
                    .is_some();
                if removed {
                    while let Ok(task) = rx.try_recv() {
                        task.await;
                    }
                    debug!(guild_id = %guild_id, "tenant actor retired");
                    break;
                }
            }
        }
    }
}
