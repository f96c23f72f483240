//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define relay metrics (throttling, sessions, requests, frames, sniffing)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `relay_throttle_ticks_total` (counter): scheduler ticks
//! - `relay_throttled_bytes_total` (counter): bytes moved through throttled streams, by rule_set
//! - `relay_sessions_active` (gauge): open client sessions
//! - `relay_requests_total` (counter): proxied requests by status
//! - `relay_websocket_frames_total` (counter): relayed frames by direction
//! - `relay_tls_sniff_total` (counter): ClientHello sniff outcomes
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a cheap no-op

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::throttle::RuleSetId;

/// Install the Prometheus recorder and its HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_throttle_tick() {
    counter!("relay_throttle_ticks_total").increment(1);
}

pub fn record_throttled_bytes(rule_set: RuleSetId, bytes: usize) {
    counter!("relay_throttled_bytes_total", "rule_set" => rule_set.to_string())
        .increment(bytes as u64);
}

pub fn record_session_opened() {
    gauge!("relay_sessions_active").increment(1.0);
}

pub fn record_session_closed() {
    gauge!("relay_sessions_active").decrement(1.0);
}

pub fn record_request(status: u16) {
    counter!("relay_requests_total", "status" => status.to_string()).increment(1);
}

/// `direction` is `"to_server"` or `"to_client"`.
pub fn record_websocket_frame(direction: &'static str) {
    counter!("relay_websocket_frames_total", "direction" => direction).increment(1);
}

/// `outcome` is `"ok"`, `"acme_refused"`, `"unknown_sni"` or `"error"`.
pub fn record_tls_sniff(outcome: &'static str) {
    counter!("relay_tls_sniff_total", "outcome" => outcome).increment(1);
}
