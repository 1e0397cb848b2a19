//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by command, status. The
//!   command label is `other` unless the backend accepted the command, so
//!   clients cannot mint new series.
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_active_connections` (gauge): current connection count
//! - `gateway_active_subscriptions` (gauge): live pub/sub streams
//! - `gateway_acl_denied_total` (counter): requests refused by the ACL
//! - `gateway_published_messages_total` (counter): chunks streamed to subscribers
//! - `gateway_discarded_replies_total` (counter): backend replies whose connection was gone
//!
//! Recording without an installed recorder is a no-op, so these helpers are
//! safe to call from tests.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(command: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "command" => command.to_ascii_uppercase(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_acl_denied() {
    metrics::counter!("gateway_acl_denied_total").increment(1);
}

pub fn record_published_message() {
    metrics::counter!("gateway_published_messages_total").increment(1);
}

pub fn record_discarded_reply() {
    metrics::counter!("gateway_discarded_replies_total").increment(1);
}

pub fn connection_opened() {
    metrics::gauge!("gateway_active_connections").increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!("gateway_active_connections").decrement(1.0);
}

pub fn subscription_opened() {
    metrics::gauge!("gateway_active_subscriptions").increment(1.0);
}

pub fn subscription_closed() {
    metrics::gauge!("gateway_active_subscriptions").decrement(1.0);
}
