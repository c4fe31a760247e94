//! Newsroom backend: dashboard analytics API and the scheduled-publication
//! reconciler.

mod auth_action;
mod config;
mod handlers;
mod logging;
mod reconciler;
mod routes;
mod state;

use anyhow::{Context, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::ServerConfig::from_env()?;
    let _log_guard = logging::init(config.log_dir.as_deref())?;

    tracing::info!("Starting newsroom backend");
    tracing::info!("Datastore host: {}", config.datastore_host());
    tracing::info!("Legacy user paths: {:?}", config.dashboard.legacy_user_paths);
    if config.dashboard.demo_mode {
        tracing::warn!("DASHBOARD_DEMO_MODE is on: placeholder data replaces unavailable sources");
    }

    let app_state = state::AppState::from_config(&config)?;

    let reconciler = if config.reconciler.enabled {
        Some(reconciler::spawn_publication_reconciler(
            app_state.datastore(),
            config.reconciler.clone(),
        ))
    } else {
        tracing::info!("Publication reconciler disabled");
        None
    };

    let app = routes::create_router(app_state);

    let addr = format!("{}:{}", config.bind_addr, config.port);
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(reconciler) = reconciler {
        reconciler.shutdown().await;
    }
    tracing::info!("Newsroom backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
