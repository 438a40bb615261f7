//! Session lifecycle: pending, active, closed.
//!
//! A session exists from the moment a client's request is granted until
//! either leg disconnects, the relay reports idle, or the management
//! surface terminates it. The registry owns the reserved relay slot, so
//! removal of an entry is what frees pool capacity.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::RngCore;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RouterError;
use crate::peers::{ConnId, HostId};
use crate::pool::ProxySlot;
use rondo_proto::{ErrorCode, PeerRole, RouterToPeer, SessionType};

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Offer sent, waiting for both legs to attach to the relay.
    Pending,
    /// Both legs attached; payload is flowing.
    Active,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Active => "active",
        }
    }
}

/// Outcome of one leg attaching at the relay.
pub enum AttachOutcome {
    /// First leg in; park it until the other arrives.
    FirstLeg,
    /// Second leg in; forwarding can start under this token.
    BothAttached(CancellationToken),
}

struct SessionEntry {
    session_id: SessionId,
    client_conn: ConnId,
    host_conn: ConnId,
    host_id: HostId,
    session_type: SessionType,
    relay_key: [u8; 32],
    state: SessionState,
    client_attached: bool,
    host_attached: bool,
    created: Instant,
    cancel: CancellationToken,
    client_sender: mpsc::Sender<RouterToPeer>,
    host_sender: mpsc::Sender<RouterToPeer>,
    /// Dropped with the entry, releasing pool capacity.
    _slot: ProxySlot,
}

/// Point-in-time view of a session for the management surface.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub client_conn: ConnId,
    pub host_conn: ConnId,
    pub host_id: HostId,
    pub session_type: SessionType,
    pub state: SessionState,
    pub age: Duration,
}

struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    /// Ordered (client, host) pairs with a live session.
    pairs: HashMap<(ConnId, ConnId), SessionId>,
}

/// Everything a granted request needs to build the session offer.
#[derive(Debug)]
pub struct SessionGrant {
    pub session_id: SessionId,
    pub relay_key: [u8; 32],
}

/// Registry of pending and active sessions.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    /// How long a pending session may wait for both legs.
    attach_timeout: Duration,
    shutdown: Notify,
}

impl SessionRegistry {
    pub fn new(attach_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                pairs: HashMap::new(),
            }),
            attach_timeout,
            shutdown: Notify::new(),
        }
    }

    /// Record a new pending session.
    ///
    /// At most one pending or active session may exist per ordered
    /// (client, host) pair. The session id is drawn at random and
    /// redrawn under the lock until free.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        client_conn: ConnId,
        host_conn: ConnId,
        host_id: HostId,
        session_type: SessionType,
        slot: ProxySlot,
        client_sender: mpsc::Sender<RouterToPeer>,
        host_sender: mpsc::Sender<RouterToPeer>,
    ) -> Result<SessionGrant, RouterError> {
        let mut inner = self.inner.write();

        let pair = (client_conn, host_conn);
        if inner.pairs.contains_key(&pair) {
            return Err(RouterError::SessionAlreadyExists);
        }

        let mut session_id = rand::thread_rng().next_u64();
        while session_id == 0 || inner.sessions.contains_key(&session_id) {
            session_id = rand::thread_rng().next_u64();
        }
        let mut relay_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut relay_key);

        info!(
            session_id,
            client_conn,
            host_conn,
            host_id,
            session_type = %session_type,
            "session created"
        );
        inner.pairs.insert(pair, session_id);
        inner.sessions.insert(
            session_id,
            SessionEntry {
                session_id,
                client_conn,
                host_conn,
                host_id,
                session_type,
                relay_key,
                state: SessionState::Pending,
                client_attached: false,
                host_attached: false,
                created: Instant::now(),
                cancel: CancellationToken::new(),
                client_sender,
                host_sender,
                _slot: slot,
            },
        );
        rondo_metrics::record_session_created();
        Ok(SessionGrant {
            session_id,
            relay_key,
        })
    }

    /// Validate one leg's attach preamble.
    ///
    /// The key must match the offer and each leg may attach once. The
    /// second valid leg flips the session to `Active`.
    pub fn attach(
        &self,
        session_id: SessionId,
        key: &[u8; 32],
        role: PeerRole,
    ) -> Result<AttachOutcome, RouterError> {
        let mut inner = self.inner.write();
        let entry = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(RouterError::HostNotFound)?;

        if entry.relay_key != *key {
            warn!(session_id, "relay attach with wrong key");
            return Err(RouterError::ProtocolViolation("bad relay key"));
        }
        let attached = match role {
            PeerRole::Client => &mut entry.client_attached,
            PeerRole::Host => &mut entry.host_attached,
            PeerRole::Proxy => {
                return Err(RouterError::ProtocolViolation("proxy cannot attach"))
            }
        };
        if *attached {
            return Err(RouterError::ProtocolViolation("leg attached twice"));
        }
        *attached = true;

        if entry.client_attached && entry.host_attached {
            entry.state = SessionState::Active;
            debug!(session_id, "both legs attached, session active");
            Ok(AttachOutcome::BothAttached(entry.cancel.clone()))
        } else {
            debug!(session_id, role = %role, "first leg attached");
            Ok(AttachOutcome::FirstLeg)
        }
    }

    /// Tear down one session, notifying both legs.
    ///
    /// Idempotent: closing an unknown id is a no-op. The relay slot is
    /// released when the entry drops.
    pub fn close(&self, session_id: SessionId, reason: ErrorCode) -> bool {
        let entry = {
            let mut inner = self.inner.write();
            match inner.sessions.remove(&session_id) {
                Some(entry) => {
                    inner.pairs.remove(&(entry.client_conn, entry.host_conn));
                    entry
                }
                None => return false,
            }
        };
        let duration = entry.created.elapsed();
        info!(
            session_id,
            reason = ?reason,
            duration_secs = duration.as_secs(),
            "session closed"
        );
        entry.cancel.cancel();
        let notice = RouterToPeer::SessionClosed { session_id, reason };
        // Outboxes are bounded; a peer too slow to take a close notice
        // is already being torn down.
        let _ = entry.client_sender.try_send(notice.clone());
        let _ = entry.host_sender.try_send(notice);
        rondo_metrics::record_session_closed(duration.as_secs_f64());
        true
    }

    /// Close every session that has this connection as a leg.
    pub fn close_for_conn(&self, conn_id: ConnId, reason: ErrorCode) -> usize {
        let ids: Vec<SessionId> = {
            let inner = self.inner.read();
            inner
                .sessions
                .values()
                .filter(|s| s.client_conn == conn_id || s.host_conn == conn_id)
                .map(|s| s.session_id)
                .collect()
        };
        let mut closed = 0;
        for session_id in ids {
            if self.close(session_id, reason) {
                closed += 1;
            }
        }
        closed
    }

    /// Close pending sessions whose legs never attached in time.
    pub fn sweep_overdue(&self) -> usize {
        let overdue: Vec<SessionId> = {
            let inner = self.inner.read();
            inner
                .sessions
                .values()
                .filter(|s| {
                    s.state == SessionState::Pending && s.created.elapsed() >= self.attach_timeout
                })
                .map(|s| s.session_id)
                .collect()
        };
        let mut closed = 0;
        for session_id in overdue {
            warn!(session_id, "pending session timed out waiting for legs");
            if self.close(session_id, ErrorCode::ConnectionTimedOut) {
                closed += 1;
            }
        }
        closed
    }

    /// Run the overdue-pending sweep until shutdown.
    pub fn start_sweeper(self: &std::sync::Arc<Self>, interval: Duration) {
        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = registry.shutdown.notified() => {
                        debug!("session sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        registry.sweep_overdue();
                    }
                }
            }
        });
    }

    /// Signal shutdown to the sweeper task.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        self.inner
            .read()
            .sessions
            .values()
            .map(|s| SessionSnapshot {
                session_id: s.session_id,
                client_conn: s.client_conn,
                host_conn: s.host_conn,
                host_id: s.host_id,
                session_type: s.session_type,
                state: s.state,
                age: s.created.elapsed(),
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// The pending sweep window, matching the relay attach deadline.
    pub fn attach_timeout(&self) -> Duration {
        self.attach_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ProxyPool;

    fn pool_slot(pool: &ProxyPool) -> ProxySlot {
        pool.select_for_session().unwrap()
    }

    fn registry() -> (SessionRegistry, ProxyPool) {
        let pool = ProxyPool::new(Duration::from_secs(45), Duration::from_secs(300));
        pool.register_builtin("127.0.0.1:8070".into(), 8);
        (SessionRegistry::new(Duration::from_secs(30)), pool)
    }

    fn outbox() -> (mpsc::Sender<RouterToPeer>, mpsc::Receiver<RouterToPeer>) {
        mpsc::channel(4)
    }

    #[test]
    fn duplicate_pair_rejected_but_reverse_allowed() {
        let (registry, pool) = registry();
        let (ctx, _crx) = outbox();
        let (htx, _hrx) = outbox();

        registry
            .create(
                1,
                2,
                77,
                SessionType::DesktopView,
                pool_slot(&pool),
                ctx.clone(),
                htx.clone(),
            )
            .unwrap();

        let err = registry
            .create(
                1,
                2,
                77,
                SessionType::FileTransfer,
                pool_slot(&pool),
                ctx.clone(),
                htx.clone(),
            )
            .unwrap_err();
        assert!(matches!(err, RouterError::SessionAlreadyExists));

        // The ordered pair is directional.
        assert!(registry
            .create(2, 1, 78, SessionType::DesktopView, pool_slot(&pool), ctx, htx)
            .is_ok());
    }

    #[test]
    fn attach_validates_key_and_transitions() {
        let (registry, pool) = registry();
        let (ctx, _crx) = outbox();
        let (htx, _hrx) = outbox();
        let grant = registry
            .create(1, 2, 77, SessionType::DesktopView, pool_slot(&pool), ctx, htx)
            .unwrap();

        let mut wrong = grant.relay_key;
        wrong[0] ^= 0x01;
        assert!(registry
            .attach(grant.session_id, &wrong, PeerRole::Client)
            .is_err());

        assert!(matches!(
            registry
                .attach(grant.session_id, &grant.relay_key, PeerRole::Client)
                .unwrap(),
            AttachOutcome::FirstLeg
        ));
        // Same leg twice is a violation.
        assert!(registry
            .attach(grant.session_id, &grant.relay_key, PeerRole::Client)
            .is_err());
        assert!(matches!(
            registry
                .attach(grant.session_id, &grant.relay_key, PeerRole::Host)
                .unwrap(),
            AttachOutcome::BothAttached(_)
        ));
        assert_eq!(registry.list()[0].state, SessionState::Active);
    }

    #[test]
    fn close_releases_slot_and_notifies_legs() {
        let pool = ProxyPool::new(Duration::from_secs(45), Duration::from_secs(300));
        pool.register_builtin("127.0.0.1:8070".into(), 1);
        let registry = SessionRegistry::new(Duration::from_secs(30));
        let (ctx, mut crx) = outbox();
        let (htx, mut hrx) = outbox();

        let grant = registry
            .create(1, 2, 77, SessionType::DesktopView, pool_slot(&pool), ctx, htx)
            .unwrap();
        // Pool of one: exhausted while the session lives.
        assert!(pool.select_for_session().is_none());

        assert!(registry.close(grant.session_id, ErrorCode::SessionIdle));
        assert!(!registry.close(grant.session_id, ErrorCode::SessionIdle));
        assert_eq!(registry.count(), 0);
        assert!(pool.select_for_session().is_some());

        for rx in [&mut crx, &mut hrx] {
            match rx.try_recv().unwrap() {
                RouterToPeer::SessionClosed { session_id, reason } => {
                    assert_eq!(session_id, grant.session_id);
                    assert_eq!(reason, ErrorCode::SessionIdle);
                }
                other => panic!("unexpected notice: {:?}", other),
            }
        }

        // Pair is free again after close.
        let (ctx2, _crx2) = outbox();
        let (htx2, _hrx2) = outbox();
        assert!(registry
            .create(1, 2, 77, SessionType::DesktopView, pool_slot(&pool), ctx2, htx2)
            .is_ok());
    }

    #[test]
    fn close_for_conn_hits_both_legs() {
        let (registry, pool) = registry();
        let (ctx, _crx) = outbox();
        let (htx, _hrx) = outbox();
        registry
            .create(
                1,
                2,
                77,
                SessionType::DesktopView,
                pool_slot(&pool),
                ctx.clone(),
                htx.clone(),
            )
            .unwrap();
        registry
            .create(3, 2, 77, SessionType::TextChat, pool_slot(&pool), ctx, htx)
            .unwrap();

        // Host connection 2 is a leg of both sessions.
        assert_eq!(registry.close_for_conn(2, ErrorCode::RemoteClosed), 2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn overdue_pending_swept() {
        let pool = ProxyPool::new(Duration::from_secs(45), Duration::from_secs(300));
        pool.register_builtin("127.0.0.1:8070".into(), 8);
        let registry = SessionRegistry::new(Duration::from_millis(0));
        let (ctx, _crx) = outbox();
        let (htx, _hrx) = outbox();
        registry
            .create(1, 2, 77, SessionType::DesktopView, pool_slot(&pool), ctx, htx)
            .unwrap();

        assert_eq!(registry.sweep_overdue(), 1);
        assert_eq!(registry.count(), 0);
    }
}
