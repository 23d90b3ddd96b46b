use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ReviewhubToml;
use crate::metrics::{self, UPKEEP_INTERVAL};

use super::api::{self, AppState, AuthTokens, SharedState};
use super::db::{DbHandle, ReviewDb};
use super::lifecycle::PullRequestLifecycle;
use super::roster::Roster;

/// Wire the core services around one database handle.
pub fn build_state(db: DbHandle, auth: AuthTokens, metrics: PrometheusHandle) -> SharedState {
    Arc::new(AppState {
        lifecycle: PullRequestLifecycle::new(db.clone()),
        roster: Roster::new(db),
        auth,
        metrics,
    })
}

/// Build the full application router with request tracing.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let mut app = api::api_router(&state)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the configured database, creating the schema if needed.
pub fn open_database(config: &ReviewhubToml) -> Result<ReviewDb> {
    ReviewDb::open(&config.database.path, config.database.busy_timeout())
        .with_context(|| format!("Failed to open database at {}", config.database.path.display()))
}

/// Start the review server and run until Ctrl+C.
pub async fn start_server(config: &ReviewhubToml) -> Result<()> {
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let db = DbHandle::new(open_database(config)?)
        .with_call_timeout(config.database.call_timeout());
    let auth = AuthTokens::new(&config.auth.admin_token, &config.auth.user_token);
    let handle = metrics::install_recorder()?;
    let upkeep = handle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(UPKEEP_INTERVAL);
        loop {
            ticker.tick().await;
            upkeep.run_upkeep();
        }
    });
    let app = build_router(build_state(db, auth, handle), config.server.dev_mode);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        db_path = %config.database.path.display(),
        dev_mode = config.server.dev_mode,
        "reviewhub listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C; shutdown signal disabled"),
    }
}
