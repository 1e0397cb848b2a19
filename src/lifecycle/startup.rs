//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order: metrics, backend, ACL and
//!   server state, admin surface, listener
//! - Run until a termination signal, then drain open connections
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, so traffic only arrives once everything is up

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::admin::{self, AdminState};
use crate::backend::{Backend, BackendError, RedisBackend};
use crate::config::GatewayConfig;
use crate::http::HttpServer;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;
use crate::security::AclConfigError;

/// How long to wait for connections to finish after shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Error bringing the gateway up.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
    #[error("access control: {0}")]
    Acl(#[from] AclConfigError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Bring the gateway up against Redis and run it until SIGINT/SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let backend = RedisBackend::open(&config.redis.url)?;
    tracing::info!(url = %config.redis.url, "Redis backend configured");

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    serve(&config, Arc::new(backend), shutdown).await
}

/// Serve `backend` until `shutdown` fires, then drain.
pub async fn serve(
    config: &GatewayConfig,
    backend: Arc<dyn Backend>,
    shutdown: Shutdown,
) -> Result<(), StartupError> {
    let server = HttpServer::new(config, backend)?;
    let state = server.state();

    if config.admin.enabled {
        let admin_state = AdminState::new(state.clone(), &config.admin.api_key);
        let admin_config = config.admin.clone();
        let admin_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(&admin_config, admin_state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin endpoint failed");
            }
        });
    }

    let listener = Listener::bind(&config.listener).await?;
    server.run(listener, shutdown).await?;

    if !state.tracker.wait_for_idle(DRAIN_DEADLINE).await {
        tracing::warn!(
            remaining = state.tracker.active_count(),
            "Connections still open at drain deadline"
        );
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
