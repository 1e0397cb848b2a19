use axum::{extract::State, Json};
use serde::Serialize;

use super::AdminState;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct GatewayStats {
    pub active_connections: u64,
    /// (connection, topic) registrations.
    pub subscriptions: usize,
    /// Topics with a live upstream subscription.
    pub topics: usize,
    pub acl_entries: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<GatewayStats> {
    let gateway = &state.gateway;
    Json(GatewayStats {
        active_connections: gateway.tracker.active_count(),
        subscriptions: gateway.hub.subscriber_count(),
        topics: gateway.hub.topic_count(),
        acl_entries: gateway.acl.len(),
    })
}
