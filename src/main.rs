//! Watch Party Back binary entrypoint wiring the sync, signaling, and snapshot layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dao;
mod dto;
mod error;
mod routes;
mod services;
mod state;

use config::{AppConfig, DirectoryConfig};
#[cfg(feature = "http-directory")]
use dao::directory::http::HttpDirectory;
use dao::directory::memory::MemoryDirectory;
use dao::directory::{IdentityProvider, PartyDirectory, UserDirectory};
use dao::snapshot_store::{SnapshotStore, file::FileSnapshotStore};
use state::{AppState, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();

    let (identity_provider, party_directory, user_directory) = build_directories(&config)?;
    let snapshot_store: Arc<dyn SnapshotStore> =
        Arc::new(FileSnapshotStore::new(config.snapshot_path().clone()));

    let registry = services::snapshot_service::restore(&snapshot_store).await;
    let coordinator = state::coordinator::SyncCoordinator::spawn(registry);

    let app_state = AppState::new(
        config,
        coordinator,
        snapshot_store,
        identity_provider,
        party_directory,
        user_directory,
    );

    tokio::spawn(services::snapshot_service::run(app_state.clone()));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

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

    // One last write so a clean shutdown loses at most in-flight wishes.
    services::snapshot_service::flush(&app_state).await;

    Ok(())
}

/// Construct the directory backends selected by the configuration.
fn build_directories(
    config: &AppConfig,
) -> anyhow::Result<(
    Arc<dyn IdentityProvider>,
    Arc<dyn PartyDirectory>,
    Arc<dyn UserDirectory>,
)> {
    match config.directory() {
        DirectoryConfig::Http { base_url, token } => {
            #[cfg(feature = "http-directory")]
            {
                let directory = HttpDirectory::new(base_url, token.as_deref())
                    .context("building directory client")?;
                info!(base_url = %base_url, "using HTTP directory");
                Ok((
                    Arc::new(directory.clone()),
                    Arc::new(directory.clone()),
                    Arc::new(directory),
                ))
            }
            #[cfg(not(feature = "http-directory"))]
            {
                let _ = (base_url, token);
                anyhow::bail!(
                    "configuration selects the HTTP directory but this build lacks the `http-directory` feature"
                )
            }
        }
        DirectoryConfig::Memory { seed_path } => {
            let directory = match seed_path {
                Some(path) => MemoryDirectory::from_seed_path(path)
                    .context("seeding in-memory directory")?,
                None => {
                    warn!("no directory seed configured; every token and join will be refused");
                    MemoryDirectory::empty()
                }
            };
            Ok((
                Arc::new(directory.clone()),
                Arc::new(directory.clone()),
                Arc::new(directory),
            ))
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
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
