//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default handshake deadline in seconds. Covers every stage from hello
/// to credential check; a peer that stalls mid-handshake is dropped.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;
/// Default idle session timeout in seconds. A session with no payload in
/// either direction for this long is force-closed.
pub const DEFAULT_IDLE_SESSION_TIMEOUT_SECS: u64 = 600;
/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Proxy Pool Defaults
// ============================================================================

/// Default heartbeat interval expected from relay proxies, in seconds.
pub const DEFAULT_PROXY_HEARTBEAT_SECS: u64 = 15;
/// Missed-heartbeat window after which a proxy is marked unreachable.
pub const DEFAULT_PROXY_UNREACHABLE_SECS: u64 = 45;
/// Grace window after which an unreachable proxy is evicted entirely.
pub const DEFAULT_PROXY_EVICT_SECS: u64 = 300;

// ============================================================================
// Buffer/Size Defaults
// ============================================================================

/// Default relay buffer size (32 KiB, tuned for forwarding throughput).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;
/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;
/// Default concurrent session capacity of the built-in relay.
pub const DEFAULT_RELAY_POOL_SIZE: u32 = 256;
/// Deadline for a relay leg to send its attach preamble, in seconds.
pub const DEFAULT_RELAY_ATTACH_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Throttle Defaults
// ============================================================================

/// Default max authentication failures per source IP within the window.
pub const DEFAULT_AUTH_FAILURE_LIMIT: u32 = 10;
/// Default auth failure window in seconds.
pub const DEFAULT_AUTH_FAILURE_WINDOW_SECS: u64 = 60;
/// Default throttle cleanup interval in seconds.
pub const DEFAULT_THROTTLE_CLEANUP_SECS: u64 = 300;

// ============================================================================
// Protocol Constants
// ============================================================================

/// Wire protocol version. Peers announcing a different version are rejected.
pub const PROTOCOL_VERSION: u32 = 2;
/// Length of the challenge issued during the handshake, in bytes.
pub const CHALLENGE_LEN: usize = 32;
/// Length of the key issued to hosts when a host id is created, in bytes.
pub const HOST_KEY_LEN: usize = 64;
