//! Registry of authenticated peers and host id issuance.
//!
//! Every authenticated connection gets an entry here until it closes.
//! Hosts additionally bind a stable `HostId`: a fresh id comes with a
//! random key the host must persist, and presenting that key after a
//! reconnect re-binds the same id. Only a hash of the key is kept.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::RwLock;
use rand::RngCore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::RouterError;
use rondo_auth::sha256_hex_bytes;
use rondo_core::HOST_KEY_LEN;
use rondo_proto::{HostIdVariant, PeerRole, RouterToPeer};

pub type ConnId = u64;
pub type HostId = u64;

/// One authenticated peer.
pub struct PeerInfo {
    pub conn_id: ConnId,
    pub addr: SocketAddr,
    pub role: PeerRole,
    pub user: String,
    pub host_id: Option<HostId>,
    /// Cancelling this token ends the peer's connection task.
    pub cancel: CancellationToken,
    /// Control-channel outbox, drained by the connection task.
    pub sender: mpsc::Sender<RouterToPeer>,
}

/// Point-in-time view of a peer for the management surface.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub conn_id: ConnId,
    pub addr: SocketAddr,
    pub role: PeerRole,
    pub user: String,
    pub host_id: Option<HostId>,
}

struct Inner {
    peers: HashMap<ConnId, PeerInfo>,
    /// Currently connected hosts by id.
    hosts_online: HashMap<HostId, ConnId>,
    /// Issued ids by key hash. Survives host disconnects so a returning
    /// host re-binds the same id.
    ids_by_key_hash: HashMap<String, HostId>,
}

/// Registry of live peers.
pub struct PeerRegistry {
    inner: RwLock<Inner>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                peers: HashMap::new(),
                hosts_online: HashMap::new(),
                ids_by_key_hash: HashMap::new(),
            }),
        }
    }

    pub fn insert(&self, peer: PeerInfo) {
        let mut inner = self.inner.write();
        debug!(conn_id = peer.conn_id, role = %peer.role, user = %peer.user, "peer registered");
        inner.peers.insert(peer.conn_id, peer);
    }

    /// Remove a peer, unbinding its online host id if any.
    pub fn remove(&self, conn_id: ConnId) -> Option<PeerInfo> {
        let mut inner = self.inner.write();
        let peer = inner.peers.remove(&conn_id)?;
        if let Some(host_id) = peer.host_id {
            if inner.hosts_online.get(&host_id) == Some(&conn_id) {
                inner.hosts_online.remove(&host_id);
            }
        }
        Some(peer)
    }

    /// Issue or re-bind a host id for an authenticated host connection.
    ///
    /// Returns the id and, for fresh issuance, the key the host must
    /// persist. An existing-id request with an unknown key is refused;
    /// the host falls back to requesting a new id.
    pub fn bind_host(
        &self,
        conn_id: ConnId,
        request: &HostIdVariant,
    ) -> Result<(HostId, Option<Vec<u8>>), RouterError> {
        let mut inner = self.inner.write();

        let (host_id, key) = match request {
            HostIdVariant::NewId => {
                let mut key = vec![0u8; HOST_KEY_LEN];
                rand::thread_rng().fill_bytes(&mut key);
                let hash = sha256_hex_bytes(&key);
                let mut id = rand::thread_rng().next_u64();
                while id == 0 || inner.ids_by_key_hash.values().any(|&v| v == id) {
                    id = rand::thread_rng().next_u64();
                }
                inner.ids_by_key_hash.insert(hash, id);
                info!(conn_id, host_id = id, "issued new host id");
                (id, Some(key))
            }
            HostIdVariant::ExistingId { key } => {
                let hash = sha256_hex_bytes(key);
                let id = *inner
                    .ids_by_key_hash
                    .get(&hash)
                    .ok_or(RouterError::HostNotFound)?;
                debug!(conn_id, host_id = id, "host re-bound existing id");
                (id, None)
            }
        };

        // A reconnecting host displaces any stale binding for the same id.
        inner.hosts_online.insert(host_id, conn_id);
        if let Some(peer) = inner.peers.get_mut(&conn_id) {
            peer.host_id = Some(host_id);
        }
        Ok((host_id, key))
    }

    /// Connection currently serving this host id.
    pub fn resolve_host(&self, host_id: HostId) -> Option<ConnId> {
        self.inner.read().hosts_online.get(&host_id).copied()
    }

    /// Control-channel outbox for a peer.
    pub fn sender(&self, conn_id: ConnId) -> Option<mpsc::Sender<RouterToPeer>> {
        self.inner.read().peers.get(&conn_id).map(|p| p.sender.clone())
    }

    /// Force-disconnect one peer. Returns false if unknown.
    pub fn disconnect(&self, conn_id: ConnId) -> bool {
        let inner = self.inner.read();
        match inner.peers.get(&conn_id) {
            Some(peer) => {
                peer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Force-disconnect every peer.
    pub fn disconnect_all(&self) -> usize {
        let inner = self.inner.read();
        for peer in inner.peers.values() {
            peer.cancel.cancel();
        }
        inner.peers.len()
    }

    pub fn list(&self) -> Vec<PeerSnapshot> {
        self.inner
            .read()
            .peers
            .values()
            .map(|p| PeerSnapshot {
                conn_id: p.conn_id,
                addr: p.addr,
                role: p.role,
                user: p.user.clone(),
                host_id: p.host_id,
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().peers.len()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(conn_id: ConnId, role: PeerRole) -> (PeerInfo, mpsc::Receiver<RouterToPeer>) {
        let (tx, rx) = mpsc::channel(4);
        (
            PeerInfo {
                conn_id,
                addr: "127.0.0.1:5000".parse().unwrap(),
                role,
                user: "alice".into(),
                host_id: None,
                cancel: CancellationToken::new(),
                sender: tx,
            },
            rx,
        )
    }

    #[test]
    fn new_id_then_rebind_by_key() {
        let registry = PeerRegistry::new();
        let (host, _rx) = peer(1, PeerRole::Host);
        registry.insert(host);

        let (id, key) = registry.bind_host(1, &HostIdVariant::NewId).unwrap();
        let key = key.expect("fresh issuance returns a key");
        assert_eq!(key.len(), HOST_KEY_LEN);
        assert_eq!(registry.resolve_host(id), Some(1));

        // Host drops and reconnects with the issued key.
        registry.remove(1);
        assert_eq!(registry.resolve_host(id), None);

        let (host2, _rx2) = peer(2, PeerRole::Host);
        registry.insert(host2);
        let (rebound, no_key) = registry
            .bind_host(2, &HostIdVariant::ExistingId { key })
            .unwrap();
        assert_eq!(rebound, id);
        assert!(no_key.is_none());
        assert_eq!(registry.resolve_host(id), Some(2));
    }

    #[test]
    fn unknown_key_is_refused() {
        let registry = PeerRegistry::new();
        let (host, _rx) = peer(1, PeerRole::Host);
        registry.insert(host);

        let err = registry
            .bind_host(1, &HostIdVariant::ExistingId { key: vec![0u8; 64] })
            .unwrap_err();
        assert!(matches!(err, RouterError::HostNotFound));
    }

    #[test]
    fn disconnect_cancels_token() {
        let registry = PeerRegistry::new();
        let (client, _rx) = peer(7, PeerRole::Client);
        let cancel = client.cancel.clone();
        registry.insert(client);

        assert!(registry.disconnect(7));
        assert!(cancel.is_cancelled());
        assert!(!registry.disconnect(99));
    }

    #[test]
    fn remove_only_unbinds_own_host_id() {
        let registry = PeerRegistry::new();
        let (a, _ra) = peer(1, PeerRole::Host);
        registry.insert(a);
        let (id, key) = registry.bind_host(1, &HostIdVariant::NewId).unwrap();
        let key = key.unwrap();

        // Same host reconnects before the old connection is reaped.
        let (b, _rb) = peer(2, PeerRole::Host);
        registry.insert(b);
        registry
            .bind_host(2, &HostIdVariant::ExistingId { key })
            .unwrap();

        registry.remove(1);
        // The newer binding survives.
        assert_eq!(registry.resolve_host(id), Some(2));
    }
}
