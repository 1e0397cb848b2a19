//! Admin surface.
//!
//! A small axum router on its own address, protected by a bearer token:
//! - `GET /admin/status`: version and uptime
//! - `GET /admin/stats`: live connections, subscriptions and topics

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::{get_stats, get_status};
use crate::config::AdminConfig;
use crate::http::GatewayState;
use crate::lifecycle::Shutdown;

/// State handed to admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<GatewayState>,
    pub started: Instant,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(gateway: Arc<GatewayState>, api_key: &str) -> Self {
        Self {
            gateway,
            started: Instant::now(),
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/stats", get(get_stats))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin router until shutdown.
pub async fn serve(config: &AdminConfig, state: AdminState, shutdown: Shutdown) -> std::io::Result<()> {
    let listener = TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin endpoint listening");
    let mut stop = shutdown.subscribe();
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            stop.recv().await;
        })
        .await
}
