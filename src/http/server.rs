//! HTTP server setup and the accept loop.
//!
//! # Responsibilities
//! - Build the shared, read-only gateway state once from configuration
//! - Accept sockets and run one `HttpConnection` task per socket
//! - Stop accepting and cancel connection tasks on shutdown

use std::sync::Arc;
use std::time::Duration;

use crate::backend::Backend;
use crate::config::{GatewayConfig, HttpConfig};
use crate::http::connection::HttpConnection;
use crate::lifecycle::Shutdown;
use crate::net::{Accepted, ConnectionTracker, Listener, ListenerError};
use crate::pubsub::SubscriptionHub;
use crate::security::{AclConfigError, AclList};

/// State shared by every connection.
pub struct GatewayState {
    /// Compiled once at startup and never mutated.
    pub acl: AclList,
    pub backend: Arc<dyn Backend>,
    pub hub: SubscriptionHub,
    pub http: HttpConfig,
    pub tracker: ConnectionTracker,
}

impl GatewayState {
    pub fn new(config: &GatewayConfig, backend: Arc<dyn Backend>) -> Result<Self, AclConfigError> {
        let acl = AclList::from_config(&config.acl)?;
        let hub = SubscriptionHub::new(backend.clone(), config.redis.pubsub_buffer);
        Ok(Self {
            acl,
            backend,
            hub,
            http: config.http.clone(),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Deadline for a backend call, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.http.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    state: Arc<GatewayState>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &GatewayConfig, backend: Arc<dyn Backend>) -> Result<Self, AclConfigError> {
        let state = GatewayState::new(config, backend)?;
        tracing::info!(acl_entries = state.acl.len(), "Access control list compiled");
        Ok(Self {
            state: Arc::new(state),
        })
    }

    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ListenerError> {
        let mut stop = shutdown.subscribe();
        tracing::info!(
            address = ?listener.local_addr().ok(),
            "HTTP server starting"
        );

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = stop.recv() => {
                    tracing::info!("Shutdown signal received; no longer accepting connections");
                    break;
                }
            };
            let Accepted { stream, peer, slot } = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let state = self.state.clone();
            let mut cancel = shutdown.subscribe();
            tokio::spawn(async move {
                let _slot = slot;
                let guard = state.tracker.track();
                let connection = HttpConnection::new(guard.id(), peer, stream, state);
                tokio::select! {
                    _ = connection.run() => {}
                    _ = cancel.recv() => {
                        tracing::debug!(connection_id = %guard.id(), "Connection cancelled by shutdown");
                    }
                }
            });
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
