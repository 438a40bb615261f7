//! Serde default functions, backed by the shared constants.

use rondo_core::defaults;

pub(crate) fn connection_backlog() -> u32 {
    defaults::DEFAULT_CONNECTION_BACKLOG
}

pub(crate) fn handshake_timeout_secs() -> u64 {
    defaults::DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

pub(crate) fn idle_session_timeout_secs() -> u64 {
    defaults::DEFAULT_IDLE_SESSION_TIMEOUT_SECS
}

pub(crate) fn relay_buffer_size() -> usize {
    defaults::DEFAULT_RELAY_BUFFER_SIZE
}

pub(crate) fn relay_listen() -> String {
    "0.0.0.0:8070".to_string()
}

pub(crate) fn relay_pool_size() -> u32 {
    defaults::DEFAULT_RELAY_POOL_SIZE
}

pub(crate) fn relay_attach_timeout_secs() -> u64 {
    defaults::DEFAULT_RELAY_ATTACH_TIMEOUT_SECS
}

pub(crate) fn proxy_unreachable_secs() -> u64 {
    defaults::DEFAULT_PROXY_UNREACHABLE_SECS
}

pub(crate) fn proxy_evict_secs() -> u64 {
    defaults::DEFAULT_PROXY_EVICT_SECS
}

pub(crate) fn auth_failure_limit() -> u32 {
    defaults::DEFAULT_AUTH_FAILURE_LIMIT
}

pub(crate) fn auth_failure_window_secs() -> u64 {
    defaults::DEFAULT_AUTH_FAILURE_WINDOW_SECS
}

pub(crate) fn throttle_cleanup_secs() -> u64 {
    defaults::DEFAULT_THROTTLE_CLEANUP_SECS
}

pub(crate) fn enabled() -> bool {
    true
}

pub(crate) fn log_level() -> String {
    "info".to_string()
}

pub(crate) fn log_format() -> String {
    "text".to_string()
}
