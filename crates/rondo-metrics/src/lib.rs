//! Metrics collection and Prometheus exporter for the rondo router.
//!
//! Connection counts, handshake outcomes, session lifecycle, proxy pool
//! occupancy, and relayed byte counters.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total number of TCP connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rondo_connections_total";
/// Number of currently active connections.
pub const CONNECTIONS_ACTIVE: &str = "rondo_connections_active";
/// Total number of connections rejected (throttle, max connections).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rondo_connections_rejected_total";
/// Total number of successful authentications, by role.
pub const AUTH_SUCCESS_TOTAL: &str = "rondo_auth_success_total";
/// Total number of failed authentications, by internal reason.
pub const AUTH_FAILURE_TOTAL: &str = "rondo_auth_failure_total";
/// Total number of sessions created.
pub const SESSIONS_TOTAL: &str = "rondo_sessions_total";
/// Number of currently pending or active sessions.
pub const SESSIONS_ACTIVE: &str = "rondo_sessions_active";
/// Session duration histogram (seconds).
pub const SESSION_DURATION_SECONDS: &str = "rondo_session_duration_seconds";
/// Total bytes relayed client to host.
pub const RELAY_BYTES_CLIENT_TO_HOST: &str = "rondo_relay_bytes_client_to_host_total";
/// Total bytes relayed host to client.
pub const RELAY_BYTES_HOST_TO_CLIENT: &str = "rondo_relay_bytes_host_to_client_total";
/// Number of registered relay proxies.
pub const PROXIES_REGISTERED: &str = "rondo_proxies_registered";
/// Total relay slots across reachable proxies.
pub const PROXY_POOL_CAPACITY: &str = "rondo_proxy_pool_capacity";
/// Occupied relay slots across all proxies.
pub const PROXY_POOL_LOAD: &str = "rondo_proxy_pool_load";
/// Total number of errors by class.
pub const ERRORS_TOTAL: &str = "rondo_errors_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a new connection accepted.
#[inline]
pub fn record_connection_accepted() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection closed.
#[inline]
pub fn record_connection_closed() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a connection rejected before the handshake.
#[inline]
pub fn record_connection_rejected(reason: &'static str) {
    counter!(CONNECTIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record a successful authentication.
#[inline]
pub fn record_auth_success(role: &'static str) {
    counter!(AUTH_SUCCESS_TOTAL, "role" => role).increment(1);
}

/// Record a failed authentication with its internal reason.
#[inline]
pub fn record_auth_failure(reason: &'static str) {
    counter!(AUTH_FAILURE_TOTAL, "reason" => reason).increment(1);
}

/// Record a session created.
#[inline]
pub fn record_session_created() {
    counter!(SESSIONS_TOTAL).increment(1);
    gauge!(SESSIONS_ACTIVE).increment(1.0);
}

/// Record a session closed with its lifetime.
#[inline]
pub fn record_session_closed(duration_secs: f64) {
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
    histogram!(SESSION_DURATION_SECONDS).record(duration_secs);
}

/// Record bytes relayed from the client leg to the host leg.
#[inline]
pub fn record_relay_client_to_host(bytes: u64) {
    counter!(RELAY_BYTES_CLIENT_TO_HOST).increment(bytes);
}

/// Record bytes relayed from the host leg to the client leg.
#[inline]
pub fn record_relay_host_to_client(bytes: u64) {
    counter!(RELAY_BYTES_HOST_TO_CLIENT).increment(bytes);
}

/// Update proxy pool gauges.
#[inline]
pub fn set_proxy_pool(registered: usize, capacity: u64, load: u64) {
    gauge!(PROXIES_REGISTERED).set(registered as f64);
    gauge!(PROXY_POOL_CAPACITY).set(capacity as f64);
    gauge!(PROXY_POOL_LOAD).set(load as f64);
}

/// Record an error by class.
#[inline]
pub fn record_error(class: &'static str) {
    counter!(ERRORS_TOTAL, "class" => class).increment(1);
}
