use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tafwatch_store::Replica;

use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub replica: Replica,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(replica: Replica) -> Self {
        Self {
            replica,
            started_at: Utc::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{session}", get(handlers::get_session))
        .route("/tmis", get(handlers::list_tmis))
        .route("/tmis/{client}/{session}/{tmt}/{tmi}", get(handlers::tmi_latest_redirect))
        .route("/tmis/{client}/{session}/{tmt}/{tmi}/{version}", get(handlers::get_tmi))
        .route("/events", get(handlers::recent_events))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve the read API until `cancel` fires.
pub async fn start(
    config: ServerConfig,
    replica: Replica,
    cancel: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState::new(replica));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "read API started");

    let task = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
            tracing::error!(error = %e, "read API stopped with error");
        }
    });

    Ok(ServerHandle { port: local_addr.port(), task })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for the server task to finish after its token was cancelled.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "read API task panicked");
        }
    }
}
