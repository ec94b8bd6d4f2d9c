use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use shelfscan_client::{
    HttpContextProvider, builtin_profiles, load_profiles, merge_profiles, registry_from_profiles,
};
use shelfscan_core::{CapabilityRegistry, ContextProvider, Orchestrator, OrchestratorConfig};
use shelfscan_db::{Database, DatabaseConfig};
use shelfscan_server::routes;
use shelfscan_server::state::AppState;

/// Locator lists are small; anything bigger than this is a mistake.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("shelfscan=info".parse()?))
        .with_target(false)
        .init();

    let admin_token = std::env::var("SHELFSCAN_ADMIN_TOKEN")
        .ok()
        .filter(|t| !t.is_empty());
    if admin_token.is_none() {
        tracing::warn!("SHELFSCAN_ADMIN_TOKEN not set, /v1 endpoints will answer 403");
    }
    let port = std::env::var("SHELFSCAN_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let config = OrchestratorConfig::from_env()?;
    let registry = Arc::new(build_registry()?);

    let use_browser = std::env::var("SHELFSCAN_BROWSER").is_ok_and(|v| v == "1" || v == "true");
    let state = if use_browser {
        browser_state(db, registry, config, admin_token).await?
    } else {
        let provider = HttpContextProvider::with_timeout(config.lifecycle.job_timeout)?;
        app_state(provider, db, registry, config, admin_token)
    };

    let app = routes::router(Arc::new(state))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_registry() -> anyhow::Result<CapabilityRegistry> {
    let builtin = builtin_profiles()?;
    let profiles = match std::env::var_os("SHELFSCAN_PROFILES").map(PathBuf::from) {
        Some(path) => {
            let overrides = load_profiles(&path)
                .with_context(|| format!("Failed to load profiles from {}", path.display()))?;
            merge_profiles(builtin, overrides)
        }
        None => builtin,
    };
    tracing::info!(platforms = profiles.len(), "Platform profiles loaded");
    Ok(registry_from_profiles(&profiles)?)
}

fn app_state<P: ContextProvider>(
    provider: P,
    db: Database,
    registry: Arc<CapabilityRegistry>,
    config: OrchestratorConfig,
    admin_token: Option<String>,
) -> AppState {
    let orchestrator = Orchestrator::new(provider, registry, db.product_repo(), config)
        .with_archive(db.run_repo());
    AppState::new(db, orchestrator, admin_token)
}

#[cfg(feature = "browser")]
async fn browser_state(
    db: Database,
    registry: Arc<CapabilityRegistry>,
    config: OrchestratorConfig,
    admin_token: Option<String>,
) -> anyhow::Result<AppState> {
    let provider = shelfscan_client::ChromiumContextProvider::launch()
        .await?
        .with_navigation_timeout(config.lifecycle.job_timeout);
    Ok(app_state(provider, db, registry, config, admin_token))
}

#[cfg(not(feature = "browser"))]
async fn browser_state(
    _db: Database,
    _registry: Arc<CapabilityRegistry>,
    _config: OrchestratorConfig,
    _admin_token: Option<String>,
) -> anyhow::Result<AppState> {
    anyhow::bail!("SHELFSCAN_BROWSER needs shelfscan-server built with the `browser` feature")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
