//! Quizdeck Back binary entrypoint wiring the REST API and MongoDB layers.

use std::{env, net::SocketAddr};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dao;
mod dto;
mod error;
mod routes;
mod services;
mod state;

use config::AppConfig;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_config = AppConfig::load();
    let app_state = AppState::new(app_config);

    #[cfg(feature = "mongo-store")]
    {
        let mongo_uri =
            env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
        let mongo_db = env::var("MONGO_DB").ok();
        tokio::spawn(mongo_supervisor::run(app_state.clone(), mongo_uri, mongo_db));
    }

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

#[cfg(feature = "mongo-store")]
mod mongo_supervisor {
    use std::{sync::Arc, time::Duration};

    use tokio::time::sleep;
    use tracing::{info, warn};

    use crate::config::HistoryStoreKind;
    use crate::dao::card_store::mongodb::{MongoCardStore, MongoConfig};
    use crate::dao::history_store::mongodb::MongoGameHistoryStore;
    use crate::state::SharedState;

    /// Supervises the MongoDB connection by retrying in the background and
    /// toggling degraded mode when connectivity changes.
    pub async fn run(state: SharedState, uri: String, db_name: Option<String>) {
        let initial_delay_ms = 1000;
        let mut delay = Duration::from_millis(initial_delay_ms);
        let max_delay = Duration::from_secs(10);

        loop {
            if let Some(installed) = state.card_store().await {
                match installed.health_check().await {
                    Ok(_) => {
                        // Healthy connection: reset the retry backoff and avoid
                        // hammering the database with pings.
                        delay = Duration::from_millis(initial_delay_ms);
                        sleep(Duration::from_secs(5)).await;
                    }
                    Err(err) => {
                        // Existing connection failed: drop it, flip to degraded
                        // mode, and retry with exponential backoff.
                        warn!(error = %err, "MongoDB ping failed; entering degraded mode");
                        state.clear_card_store().await;
                        sleep(delay).await;
                        delay = (delay * 2).min(max_delay);
                    }
                }
                continue;
            }

            let connected = match MongoConfig::from_uri(&uri, db_name.as_deref()).await {
                Ok(config) => MongoCardStore::connect(config).await,
                Err(err) => Err(err),
            };

            match connected {
                Ok(store) => {
                    // Fresh connection and indexes ready: install it and leave
                    // degraded mode.
                    info!("connected to MongoDB; leaving degraded mode");
                    if state.config().history.store == HistoryStoreKind::Durable {
                        let history = MongoGameHistoryStore::new(store.database());
                        state.install_history_store(Arc::new(history)).await;
                    }
                    state.install_card_store(Arc::new(store)).await;
                    delay = Duration::from_millis(initial_delay_ms);
                }
                Err(err) => {
                    // Could not reach MongoDB at all: wait and retry with
                    // exponential backoff.
                    warn!(error = %err, "MongoDB connection attempt failed");
                    sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                }
            }
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: state::SharedState) -> Router<()> {
    routes::router(state).layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
