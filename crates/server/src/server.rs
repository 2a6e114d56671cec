//! Router assembly and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use focusman::FocusConfig;

use crate::middleware::{log_requests, request_id};
use crate::routes::{api_info, focus, health, lenses, not_found, preprocessing};
use crate::state::ServerState;

/// JSON bodies are accepted up to 50 MB.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Overall per-request deadline; outbound calls carry their own 10 s cap.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(api_info))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/lenses", get(lenses::list_lenses))
        .route("/preprocessing", get(preprocessing::list_preprocessors))
        .route(
            "/preprocessing/cache/stats",
            get(preprocessing::cache_stats),
        )
        .route(
            "/preprocessing/{epi_id}",
            post(preprocessing::preprocess_by_id),
        )
        .route("/focus", post(focus::focus_inline))
        .route("/focus/{epi_id}", post(focus::focus_by_id))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(from_fn(request_id))
        .layer(from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Focusing Manager and serve until SIGTERM/Ctrl-C.
pub async fn start_server(config: FocusConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .json()
        .init();

    let port = config.server_port;
    let state = ServerState::from_config(config).await?;
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "starting focusing manager");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
