pub mod access;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use careguard_core::config::{Config, WarnLevel};
use std::path::PathBuf;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Domain workers
        .route("/api/actions", post(routes::actions::submit_action))
        .route("/api/actions/{id}", get(routes::actions::get_action))
        .route(
            "/api/actions/{id}/audit",
            get(routes::actions::get_action_audit),
        )
        // Human review
        .route("/api/tickets", get(routes::tickets::list_tickets))
        .route("/api/tickets/{id}", get(routes::tickets::get_ticket))
        .route(
            "/api/tickets/{id}/resolve",
            post(routes::tickets::resolve_ticket),
        )
        // Audit
        .route("/api/audit", get(routes::audit::query_audit))
        .route("/api/audit/stats", get(routes::audit::audit_stats))
        .route("/api/audit/access", get(routes::audit::access_log))
        // Policy
        .route("/api/policy", get(routes::policy::get_policy))
        .route("/api/policy/reload", post(routes::policy::reload_policy))
        .route(
            "/api/policy/classify/{action_type}",
            get(routes::policy::classify),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the governance server on `port`.
pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    serve_on(root, listener).await
}

/// Start the governance server on a pre-bound listener.
///
/// Runs the expiry sweeper alongside the HTTP server. On Ctrl-C the server
/// drains, the sweeper stops and the audit recorder is closed.
pub async fn serve_on(root: PathBuf, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let config = Config::load(&root)?;
    let warnings = config.validate();
    for w in &warnings {
        tracing::warn!(message = %w.message, "config warning");
    }
    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config.yaml has errors; run 'careguard policy check'");
    }

    let app_state = state::AppState::open(root)?;
    let orchestrator = app_state.orchestrator.clone();
    let sweeper = orchestrator.spawn_sweeper(Duration::from_secs(
        config.governance.sweep_interval_seconds,
    ));

    let actual_port = listener.local_addr()?.port();
    tracing::info!(site = %config.site, "careguard listening on http://localhost:{actual_port}");

    let result = axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await;

    orchestrator.shutdown();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "expiry sweeper failed");
    }
    result?;
    Ok(())
}
