//! Management surface.
//!
//! Typed operations for an external administrative collaborator: user
//! provisioning, peer and proxy inspection, session termination, and a
//! broadcast of count changes. No rendering or transport here; an admin
//! frontend wraps this handle.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::peers::{ConnId, PeerSnapshot};
use crate::pool::ProxySnapshot;
use crate::sessions::{SessionId, SessionSnapshot};
use crate::state::{Notification, RouterState};
use rondo_auth::{NewUser, StoreError, User, UserId};
use rondo_proto::ErrorCode;

/// Handle onto a running router for administrative operations.
#[derive(Clone)]
pub struct Management {
    state: Arc<RouterState>,
}

impl Management {
    pub fn new(state: Arc<RouterState>) -> Self {
        Self { state }
    }

    // ---- users ----

    pub fn list_users(&self) -> Vec<User> {
        self.state.users.list()
    }

    pub fn add_user(&self, user: NewUser) -> Result<UserId, StoreError> {
        let id = self.state.users.add_user(user)?;
        info!(user_id = id, "user added via management");
        self.state.notify_user_count();
        Ok(id)
    }

    pub fn update_user(&self, id: UserId, user: NewUser) -> Result<(), StoreError> {
        self.state.users.update_user(id, user)?;
        info!(user_id = id, "user updated via management");
        Ok(())
    }

    pub fn remove_user(&self, id: UserId) -> Result<(), StoreError> {
        self.state.users.remove_user(id)?;
        info!(user_id = id, "user removed via management");
        self.state.notify_user_count();
        Ok(())
    }

    // ---- peers ----

    pub fn list_peers(&self) -> Vec<PeerSnapshot> {
        self.state.peers.list()
    }

    /// Force-disconnect one peer. Its sessions close when the
    /// connection task winds down.
    pub fn disconnect_peer(&self, conn_id: ConnId) -> bool {
        let found = self.state.peers.disconnect(conn_id);
        if found {
            info!(conn_id, "peer disconnected via management");
        }
        found
    }

    pub fn disconnect_all_peers(&self) -> usize {
        let count = self.state.peers.disconnect_all();
        info!(count, "all peers disconnected via management");
        count
    }

    // ---- proxies ----

    pub fn list_proxies(&self) -> Vec<ProxySnapshot> {
        self.state.pool.snapshot()
    }

    // ---- sessions ----

    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.state.sessions.list()
    }

    /// Terminate one session; both legs are notified.
    pub fn terminate_session(&self, session_id: SessionId) -> bool {
        let closed = self.state.close_session(session_id, ErrorCode::ShuttingDown);
        if closed {
            info!(session_id, "session terminated via management");
        }
        closed
    }

    // ---- notifications ----

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rondo_auth::sha256_hex;
    use rondo_proto::SessionType;

    fn state() -> Arc<RouterState> {
        let config: rondo_config::Config = toml::from_str(
            r#"
[server]
listen = "127.0.0.1:0"
relay_listen = "127.0.0.1:0"
"#,
        )
        .unwrap();
        Arc::new(RouterState::from_config(&config).unwrap())
    }

    #[tokio::test]
    async fn user_lifecycle_with_notifications() {
        let manage = Management::new(state());
        let mut notices = manage.subscribe();

        let id = manage
            .add_user(NewUser {
                name: "carol".into(),
                password_hash: Some(sha256_hex("pw")),
                public_key: None,
                allowed_session_types: [SessionType::TextChat].into(),
                enabled: true,
            })
            .unwrap();
        assert_eq!(notices.try_recv().unwrap(), Notification::UserCount(1));
        assert_eq!(manage.list_users().len(), 1);

        manage
            .update_user(
                id,
                NewUser {
                    name: "carol".into(),
                    password_hash: Some(sha256_hex("new-pw")),
                    public_key: None,
                    allowed_session_types: [SessionType::TextChat].into(),
                    enabled: false,
                },
            )
            .unwrap();
        assert!(!manage.list_users()[0].enabled);

        manage.remove_user(id).unwrap();
        assert_eq!(notices.try_recv().unwrap(), Notification::UserCount(0));
        assert!(manage.list_users().is_empty());
    }

    #[tokio::test]
    async fn duplicate_user_rejected() {
        let manage = Management::new(state());
        let user = NewUser {
            name: "carol".into(),
            password_hash: Some(sha256_hex("pw")),
            public_key: None,
            allowed_session_types: [SessionType::TextChat].into(),
            enabled: true,
        };
        manage.add_user(user.clone()).unwrap();
        assert!(manage.add_user(user).is_err());
    }

    #[tokio::test]
    async fn terminate_unknown_session_is_noop() {
        let manage = Management::new(state());
        assert!(!manage.terminate_session(12345));
        assert!(manage.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn proxy_listing_reflects_pool() {
        let state = state();
        state.pool.register_builtin("127.0.0.1:8070".into(), 4);
        let manage = Management::new(state);
        let proxies = manage.list_proxies();
        assert_eq!(proxies.len(), 1);
        assert!(proxies[0].builtin);
    }
}
