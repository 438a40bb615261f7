//! Configuration validation logic.

use std::net::SocketAddr;

use crate::loader::ConfigError;
use crate::Config;

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.listen.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::Validation(
            "server.listen is not a valid socket address".into(),
        ));
    }
    if config.server.handshake_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.handshake_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.idle_session_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.idle_session_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.relay_buffer_size < 1024 {
        return Err(ConfigError::Validation(
            "server.relay_buffer_size must be >= 1024".into(),
        ));
    }
    if config.server.relay_buffer_size > 1024 * 1024 {
        return Err(ConfigError::Validation(
            "server.relay_buffer_size must be <= 1MB".into(),
        ));
    }
    if config.server.relay_listen.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::Validation(
            "server.relay_listen is not a valid socket address".into(),
        ));
    }
    if config.server.relay_pool_size == 0 {
        return Err(ConfigError::Validation(
            "server.relay_pool_size must be > 0".into(),
        ));
    }
    if config.server.relay_attach_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.relay_attach_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.backlog == 0 {
        return Err(ConfigError::Validation(
            "server.backlog must be > 0".into(),
        ));
    }
    if config.proxy_pool.unreachable_secs == 0 {
        return Err(ConfigError::Validation(
            "proxy_pool.unreachable_secs must be > 0".into(),
        ));
    }
    if config.proxy_pool.evict_secs < config.proxy_pool.unreachable_secs {
        return Err(ConfigError::Validation(
            "proxy_pool.evict_secs must be >= proxy_pool.unreachable_secs".into(),
        ));
    }
    if config.auth.failure_limit == 0 {
        return Err(ConfigError::Validation(
            "auth.failure_limit must be > 0".into(),
        ));
    }
    for user in &config.auth.users {
        if user.password_hash.is_none() && user.public_key.is_none() {
            return Err(ConfigError::Validation(format!(
                "auth.users: '{}' needs a password_hash or public_key",
                user.name
            )));
        }
        if let Some(key) = &user.public_key {
            match hex::decode(key) {
                Ok(bytes) if bytes.len() == 32 => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "auth.users: '{}' public_key must be 32 bytes of hex",
                        user.name
                    )))
                }
            }
        }
        if user.enabled && user.session_types.is_empty() {
            return Err(ConfigError::Validation(format!(
                "auth.users: enabled user '{}' must allow at least one session type",
                user.name
            )));
        }
    }
    if let Some(listen) = &config.metrics.listen {
        if listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(
                "metrics.listen is not a valid socket address".into(),
            ));
        }
    }
    if config.logging.format != "text" && config.logging.format != "json" {
        return Err(ConfigError::Validation(
            "logging.format must be 'text' or 'json'".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        toml::from_str(
            r#"
[server]
listen = "0.0.0.0:8060"

[[auth.users]]
name = "alice"
password_hash = "aa00"
session_types = ["desktop_view"]
"#,
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn rejects_bad_listen() {
        let mut config = valid();
        config.server.listen = "not-an-addr".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let mut config = valid();
        config.server.handshake_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.server.relay_attach_timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_evict_before_unreachable() {
        let mut config = valid();
        config.proxy_pool.unreachable_secs = 60;
        config.proxy_pool.evict_secs = 30;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_credentialless_user() {
        let mut config = valid();
        config.auth.users[0].password_hash = None;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_short_public_key() {
        let mut config = valid();
        config.auth.users[0].public_key = Some("abcd".into());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_enabled_user_without_types() {
        let mut config = valid();
        config.auth.users[0].session_types.clear();
        assert!(validate_config(&config).is_err());
    }
}
