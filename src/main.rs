//! Pirate Games Finder binary entrypoint: loads configuration, wires the
//! backend and keeps the controllers running until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pirate_games_finder::{
    config::{AppConfig, BackendSettings, LogLevel},
    dao::backend::Backend,
    services::{
        catalog_service::CatalogController, notification_service::NotificationFeed,
        session_service::SessionCoordinator,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    init_tracing(config.log_level);

    let backend = connect_backend(&config.backend).context("connecting backend")?;
    let state = AppState::new(config, backend);

    let session = SessionCoordinator::new(state.clone());
    let session_listener = session.start().await;
    let phase = state.session_handle().settled().await;
    info!(?phase, "session determined");

    let catalog = CatalogController::new(state.clone());
    match catalog.load().await {
        Ok(count) => info!(count, "games available"),
        Err(err) => warn!(error = %err, "initial catalog load failed; waiting for changes"),
    }
    let catalog_changes = catalog
        .subscribe_to_changes()
        .await
        .context("subscribing to game changes")?;

    let notifications = NotificationFeed::new(state.clone());
    let notification_listener = notifications
        .start()
        .await
        .context("starting notification feed")?;

    let mut notices = state.notices().subscribe();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            warn!(severity = ?notice.severity, message = %notice.message, "user notice");
        }
    });

    info!("pirate games finder running; press Ctrl+C to stop");
    shutdown_signal().await;

    info!("shutting down");
    drop(notification_listener);
    catalog_changes.close();
    session_listener.shutdown();
    Ok(())
}

fn connect_backend(settings: &BackendSettings) -> anyhow::Result<Backend> {
    match settings {
        #[cfg(feature = "supabase-backend")]
        BackendSettings::Supabase { url, api_key } => {
            use pirate_games_finder::dao::backend::supabase::{SupabaseClient, SupabaseConfig};

            let config = SupabaseConfig::new(url.clone(), api_key.clone())?;
            let client = SupabaseClient::connect(config)?;
            info!(%url, "using hosted backend");
            Ok(Backend::from_single(Arc::new(client)))
        }
        #[cfg(not(feature = "supabase-backend"))]
        BackendSettings::Supabase { .. } => {
            anyhow::bail!("built without the supabase-backend feature")
        }
        #[cfg(feature = "memory-backend")]
        BackendSettings::Memory => {
            use pirate_games_finder::dao::backend::memory::MemoryBackend;

            info!("using in-memory backend");
            Ok(Backend::from_single(Arc::new(MemoryBackend::new())))
        }
        #[cfg(not(feature = "memory-backend"))]
        BackendSettings::Memory => anyhow::bail!("built without the memory-backend feature"),
    }
}

/// `RUST_LOG` wins; otherwise the configured level applies to this crate.
fn init_tracing(level: LogLevel) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("warn,pirate_games_finder={}", level.as_directive()).into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
