mod auth;
mod handlers;
mod infra;
mod pairing_store;
mod routes;
mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use playhouse_core::store::PgStore;
use playhouse_core::{Config, Scheduler, Store};

use infra::app_state::AppState;
use pairing_store::PairingStore;
use websocket::manager::ConnectionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_new(&config.log).unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting playhouse-server");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let pg_store = PgStore::new(pool);
    pg_store.migrate().await?;
    info!("database migrations applied");

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let pairing = PairingStore::connect(&redis_url).await?;

    let store: Arc<dyn Store> = Arc::new(pg_store);
    let hub = Arc::new(ConnectionManager::new());
    let scheduler = Scheduler::new(store.clone(), hub.clone(), config.clone());

    scheduler.bootstrap().await;
    info!("scheduler bootstrap scan complete");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let purge_handle = tokio::spawn(playhouse_core::purge::run_forever(store.clone(), config.clone(), shutdown_rx));

    let state = AppState {
        scheduler,
        store,
        hub,
        config: Arc::new(config.clone()),
        pairing: Arc::new(pairing),
    };

    let app = routes::create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .expect("SERVER_HOST/SERVER_PORT must form a valid socket address");

    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if shutdown_tx.send(true).is_err() {
        warn!("purge worker already gone at shutdown");
    }
    if let Err(err) = purge_handle.await {
        error!(error = %err, "purge worker task panicked");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
