//! HTTP surface of the relay.
//!
//! Thin adapters over [`NotificationRelay`]: publish arbitrary payloads, shape
//! chat/order/system payloads for their channels, list active channels and
//! report database health.

pub mod error;
pub mod extract;
pub mod routes;

pub use error::AppError;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::relay::NotificationRelay;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<NotificationRelay>,
    /// Port of the WebSocket listener, advertised by `GET /`.
    pub ws_port: u16,
    pub ws_path: String,
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::routes()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve the HTTP API.
pub async fn start_http_server(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP API listening on http://{addr}");
    axum::serve(listener, create_router(state)).await
}
