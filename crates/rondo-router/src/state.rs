//! Shared router state and session orchestration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::error::RouterError;
use crate::peers::{ConnId, HostId, PeerRegistry};
use crate::pool::ProxyPool;
use crate::sessions::SessionRegistry;
use rondo_auth::{AuthError, FailureThrottle, NewUser, UserStore};
use rondo_config::Config;
use rondo_proto::{ErrorCode, RouterToPeer, SessionType};

/// Capacity of the management notification channel.
const NOTIFY_CAPACITY: usize = 64;

/// Count-change notifications for the management surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    PeerCount(usize),
    SessionCount(usize),
    UserCount(usize),
}

/// Everything shared across connection tasks.
pub struct RouterState {
    pub users: UserStore,
    pub throttle: FailureThrottle,
    pub peers: PeerRegistry,
    pub pool: ProxyPool,
    pub sessions: Arc<SessionRegistry>,
    pub handshake_timeout: Duration,
    /// Deadline for both relay legs to attach after a session offer.
    /// Shared by the registry's pending sweep and the relay preamble read.
    pub attach_timeout: Duration,
    pub idle_session_timeout: Duration,
    pub relay_buffer_size: usize,
    notifications: broadcast::Sender<Notification>,
}

impl RouterState {
    /// Build state from a validated config.
    pub fn from_config(config: &Config) -> Result<Self, RouterError> {
        let users = UserStore::new();
        for user in &config.auth.users {
            let public_key = match &user.public_key {
                Some(hex_key) => {
                    let bytes = hex::decode(hex_key)
                        .map_err(|_| RouterError::Config(format!(
                            "user '{}' public_key is not valid hex",
                            user.name
                        )))?;
                    let key: [u8; 32] = bytes.try_into().map_err(|_| {
                        RouterError::Config(format!(
                            "user '{}' public_key must be 32 bytes",
                            user.name
                        ))
                    })?;
                    Some(key)
                }
                None => None,
            };
            users
                .add_user(NewUser {
                    name: user.name.clone(),
                    password_hash: user.password_hash.clone(),
                    public_key,
                    allowed_session_types: user.session_types.iter().copied().collect(),
                    enabled: user.enabled,
                })
                .map_err(|e| RouterError::Config(format!("user '{}': {}", user.name, e)))?;
        }

        let (notifications, _) = broadcast::channel(NOTIFY_CAPACITY);
        Ok(Self {
            users,
            throttle: FailureThrottle::new(
                config.auth.failure_limit,
                config.auth.failure_window_secs,
            ),
            peers: PeerRegistry::new(),
            pool: ProxyPool::new(
                Duration::from_secs(config.proxy_pool.unreachable_secs),
                Duration::from_secs(config.proxy_pool.evict_secs),
            ),
            sessions: Arc::new(SessionRegistry::new(Duration::from_secs(
                config.server.relay_attach_timeout_secs,
            ))),
            handshake_timeout: Duration::from_secs(config.server.handshake_timeout_secs),
            attach_timeout: Duration::from_secs(config.server.relay_attach_timeout_secs),
            idle_session_timeout: Duration::from_secs(config.server.idle_session_timeout_secs),
            relay_buffer_size: config.server.relay_buffer_size,
            notifications,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Lagging or absent subscribers are fine; counts are advisory.
    pub fn notify(&self, notification: Notification) {
        let _ = self.notifications.send(notification);
    }

    pub fn notify_peer_count(&self) {
        self.notify(Notification::PeerCount(self.peers.count()));
    }

    pub fn notify_session_count(&self) {
        self.notify(Notification::SessionCount(self.sessions.count()));
    }

    pub fn notify_user_count(&self) {
        self.notify(Notification::UserCount(self.users.len()));
    }

    /// Grant or refuse a client's session request.
    ///
    /// Authorization is re-checked against the live user store rather
    /// than trusted from the handshake: a user disabled after
    /// authenticating must not start new sessions. On success the host
    /// leg has already been sent its copy of the offer; the returned
    /// message is the client's copy.
    pub fn request_session(
        &self,
        client_conn: ConnId,
        client_sender: &mpsc::Sender<RouterToPeer>,
        username: &str,
        host_id: HostId,
        session_type: SessionType,
    ) -> Result<RouterToPeer, RouterError> {
        let user = self
            .users
            .find_by_name(username)
            .ok_or(RouterError::Auth(AuthError::UnknownUser))?;
        if !user.enabled {
            return Err(RouterError::Auth(AuthError::Disabled));
        }
        if !user.is_allowed(session_type) {
            return Err(RouterError::Auth(AuthError::SessionTypeNotAllowed));
        }

        let host_conn = self
            .peers
            .resolve_host(host_id)
            .ok_or(RouterError::HostNotFound)?;
        let host_sender = self.peers.sender(host_conn).ok_or(RouterError::PeerGone)?;

        // Reserve before recording: a full pool rejects immediately,
        // never queues.
        let slot = self
            .pool
            .select_for_session()
            .ok_or(RouterError::NoCapacity)?;
        let relay_addr = slot.relay_addr().to_string();

        let grant = self.sessions.create(
            client_conn,
            host_conn,
            host_id,
            session_type,
            slot,
            client_sender.clone(),
            host_sender.clone(),
        )?;

        let offer = RouterToPeer::SessionOffer {
            session_id: grant.session_id,
            relay_addr,
            relay_key: grant.relay_key,
        };
        if host_sender.try_send(offer.clone()).is_err() {
            // Host leg gone or wedged: undo the grant.
            self.sessions.close(grant.session_id, ErrorCode::RemoteClosed);
            return Err(RouterError::PeerGone);
        }
        self.notify_session_count();
        Ok(offer)
    }

    /// Terminate one session on behalf of the management surface or the
    /// relay.
    pub fn close_session(&self, session_id: u64, reason: ErrorCode) -> bool {
        let closed = self.sessions.close(session_id, reason);
        if closed {
            self.notify_session_count();
        }
        closed
    }

    /// Cleanup when a connection ends: its sessions close, its proxy
    /// registration disappears, and its peer entry is dropped.
    pub fn connection_closed(&self, conn_id: ConnId) {
        let closed = self.sessions.close_for_conn(conn_id, ErrorCode::RemoteClosed);
        if closed > 0 {
            debug!(conn_id, closed, "closed sessions for departed connection");
            self.notify_session_count();
        }
        self.pool.unregister_by_conn(conn_id);
        if self.peers.remove(conn_id).is_some() {
            self.notify_peer_count();
        }
    }

    /// Stop background tasks owned by the state.
    pub fn shutdown_tasks(&self) {
        self.throttle.shutdown();
        self.pool.shutdown();
        self.sessions.shutdown();
    }
}
