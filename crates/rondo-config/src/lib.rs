//! Configuration loading and CLI overrides for the rondo router.

mod defaults;
mod loader;
mod validate;

use clap::Parser;
use serde::{Deserialize, Serialize};

use rondo_proto::SessionType;

pub use loader::{load_config, ConfigError};
pub use validate::validate_config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub proxy_pool: ProxyPoolConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for inbound peer connections.
    pub listen: String,
    /// Maximum concurrent connections (None = unlimited).
    #[serde(default)]
    pub max_connections: Option<usize>,
    /// TCP listener backlog.
    #[serde(default = "defaults::connection_backlog")]
    pub backlog: u32,
    /// Deadline for the whole handshake, hello through credential check.
    #[serde(default = "defaults::handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Sessions with no payload in either direction for this long are
    /// force-closed.
    #[serde(default = "defaults::idle_session_timeout_secs")]
    pub idle_session_timeout_secs: u64,
    /// Per-direction relay buffer size in bytes.
    #[serde(default = "defaults::relay_buffer_size")]
    pub relay_buffer_size: usize,
    /// Listen address for the built-in relay data plane.
    #[serde(default = "defaults::relay_listen")]
    pub relay_listen: String,
    /// Address advertised to peers in session offers. Defaults to
    /// `relay_listen`; set this when the router sits behind NAT.
    #[serde(default)]
    pub relay_advertise: Option<String>,
    /// Concurrent session capacity of the built-in relay.
    #[serde(default = "defaults::relay_pool_size")]
    pub relay_pool_size: u32,
    /// Deadline for both legs of an offered session to attach to the
    /// relay. Overdue pending sessions are swept on the same clock.
    #[serde(default = "defaults::relay_attach_timeout_secs")]
    pub relay_attach_timeout_secs: u64,
}

/// Relay proxy liveness windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyPoolConfig {
    /// A proxy silent for this long is excluded from selection.
    #[serde(default = "defaults::proxy_unreachable_secs")]
    pub unreachable_secs: u64,
    /// An unreachable proxy is evicted entirely after this long.
    #[serde(default = "defaults::proxy_evict_secs")]
    pub evict_secs: u64,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            unreachable_secs: defaults::proxy_unreachable_secs(),
            evict_secs: defaults::proxy_evict_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Authentication failures per source IP before further handshakes
    /// are refused.
    #[serde(default = "defaults::auth_failure_limit")]
    pub failure_limit: u32,
    /// Failure counting window in seconds.
    #[serde(default = "defaults::auth_failure_window_secs")]
    pub failure_window_secs: u64,
    /// Cleanup interval for expired throttle entries.
    #[serde(default = "defaults::throttle_cleanup_secs")]
    pub cleanup_interval_secs: u64,
    /// Users provisioned at startup. The management surface may add more
    /// at runtime.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            failure_limit: defaults::auth_failure_limit(),
            failure_window_secs: defaults::auth_failure_window_secs(),
            cleanup_interval_secs: defaults::throttle_cleanup_secs(),
            users: Vec::new(),
        }
    }
}

/// One provisioned user. At least one of `password_hash` (SHA-256 hex)
/// and `public_key` (Ed25519, hex) must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    pub session_types: Vec<SessionType>,
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus exporter listen address (None = disabled).
    #[serde(default)]
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, e.g. "info" or "rondo_router=debug".
    #[serde(default = "defaults::log_level")]
    pub level: String,
    /// "text" or "json".
    #[serde(default = "defaults::log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            format: defaults::log_format(),
        }
    }
}

/// CLI flags that override file configuration.
#[derive(Parser, Debug, Clone, Default)]
pub struct CliOverrides {
    /// Override server.listen
    #[arg(long)]
    pub listen: Option<String>,

    /// Override server.max_connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Override logging.level
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override metrics.listen
    #[arg(long)]
    pub metrics_listen: Option<String>,
}

/// Apply CLI overrides on top of a loaded config.
pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(listen) = &overrides.listen {
        config.server.listen = listen.clone();
    }
    if let Some(max) = overrides.max_connections {
        config.server.max_connections = Some(max);
    }
    if let Some(level) = &overrides.log_level {
        config.logging.level = level.clone();
    }
    if let Some(listen) = &overrides.metrics_listen {
        config.metrics.listen = Some(listen.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
[server]
listen = "0.0.0.0:8060"

[[auth.users]]
name = "alice"
password_hash = "aa00"
session_types = ["desktop_view", "file_transfer"]
"#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8060");
        assert_eq!(
            config.server.handshake_timeout_secs,
            rondo_core::DEFAULT_HANDSHAKE_TIMEOUT_SECS
        );
        assert_eq!(
            config.server.relay_attach_timeout_secs,
            rondo_core::DEFAULT_RELAY_ATTACH_TIMEOUT_SECS
        );
        assert_eq!(config.auth.users.len(), 1);
        let user = &config.auth.users[0];
        assert!(user.enabled);
        assert_eq!(
            user.session_types,
            vec![SessionType::DesktopView, SessionType::FileTransfer]
        );
        assert!(config.metrics.listen.is_none());
    }

    #[test]
    fn overrides_win() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        let overrides = CliOverrides {
            listen: Some("127.0.0.1:9000".into()),
            max_connections: Some(64),
            log_level: Some("debug".into()),
            metrics_listen: None,
        };
        apply_overrides(&mut config, &overrides);
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.max_connections, Some(64));
        assert_eq!(config.logging.level, "debug");
    }
}
