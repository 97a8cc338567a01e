//! HTTP bridge for the Beebo memory store.
//!
//! # Endpoints
//!
//! ## Memories
//! - `POST /memories` - Store a memory (deduplicated)
//! - `GET /memories/all` - Recent memories
//! - `GET /memories/recall?q=` - Substring recall (`/memories/search` is an alias)
//! - `GET /memories/by-tag?tag=` / `GET /memories/by-type?type=`
//! - `GET /memories/today` - Created since local midnight
//! - `GET /memories/{id}` / `DELETE /memories/{id}`
//!
//! ## Streaming
//! - `GET /mcp/sse` - Change stream (Server-Sent Events)
//!
//! ## Liveness (no token)
//! - `GET /ping`, `GET /version`, `GET /healthz`
//!
//! Every other route requires the shared token when one is configured.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod sse;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use auth::ApiToken;
pub use config::ServerConfig;
pub use state::AppState;

/// Router options that do not live in [`AppState`].
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub cors_origins: Vec<String>,
    pub max_body_bytes: usize,
}

impl From<&ServerConfig> for RouterOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            cors_origins: config.server.cors_origins.clone(),
            max_body_bytes: config.server.max_body_bytes,
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create the API router with all routes configured.
pub fn create_router(state: Arc<AppState>, options: &RouterOptions) -> Router {
    Router::new()
        .route("/memories", post(routes::create_memory))
        .route("/memories/all", get(routes::list_all))
        .route("/memories/recall", get(routes::recall))
        .route("/memories/search", get(routes::recall))
        .route("/memories/by-tag", get(routes::by_tag))
        .route("/memories/by-type", get(routes::by_type))
        .route("/memories/today", get(routes::today))
        .route(
            "/memories/{id}",
            get(routes::get_memory).delete(routes::delete_memory),
        )
        .route("/mcp/sse", get(sse::mcp_sse))
        .route("/ping", get(routes::ping))
        .route("/version", get(routes::version))
        .route("/healthz", get(routes::healthz))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ))
        .layer(RequestBodyLimitLayer::new(options.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&options.cors_origins))
        .with_state(state)
}

/// Start the API server on the given address.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr, options: RouterOptions) -> anyhow::Result<()> {
    if state.token.is_none() {
        warn!("No token configured; the memory API is open to anyone who can reach it");
    }

    let router = create_router(state, &options);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Starting Beebo memory bridge");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
