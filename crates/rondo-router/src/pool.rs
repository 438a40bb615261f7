//! Relay proxy pool and slot selection.
//!
//! Proxies register a relay endpoint and a slot count, then keep
//! themselves alive with heartbeats. Session setup reserves one slot on
//! the least-loaded reachable proxy; the reservation is an RAII guard so
//! a torn-down session can never leak load. The built-in relay is a
//! permanent pool member exempt from the heartbeat sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::peers::ConnId;

pub type ProxyId = u64;

struct ProxyEntry {
    proxy_id: ProxyId,
    /// Control connection that registered this proxy. None for the
    /// built-in relay.
    conn_id: Option<ConnId>,
    relay_addr: String,
    pool_size: u32,
    /// Slots reserved by the router. Bounded by `pool_size`.
    current_load: u32,
    /// Session count the proxy itself last reported. Informational.
    reported_sessions: u32,
    /// Registration order, used to break selection ties.
    seq: u64,
    last_heartbeat: Instant,
    reachable: bool,
    builtin: bool,
}

impl ProxyEntry {
    fn selectable(&self) -> bool {
        self.reachable && self.current_load < self.pool_size
    }
}

/// Point-in-time view of a proxy for the management surface.
#[derive(Debug, Clone)]
pub struct ProxySnapshot {
    pub proxy_id: ProxyId,
    pub relay_addr: String,
    pub pool_size: u32,
    pub current_load: u32,
    pub reported_sessions: u32,
    pub reachable: bool,
    pub builtin: bool,
}

struct Inner {
    proxies: HashMap<ProxyId, ProxyEntry>,
    next_id: ProxyId,
    next_seq: u64,
}

impl Inner {
    fn publish_gauges(&self) {
        let registered = self.proxies.len();
        let capacity: u64 = self
            .proxies
            .values()
            .filter(|p| p.reachable)
            .map(|p| p.pool_size as u64)
            .sum();
        let load: u64 = self.proxies.values().map(|p| p.current_load as u64).sum();
        rondo_metrics::set_proxy_pool(registered, capacity, load);
    }
}

/// Pool of registered relay proxies.
pub struct ProxyPool {
    inner: Arc<RwLock<Inner>>,
    unreachable_after: Duration,
    evict_after: Duration,
    shutdown: Arc<Notify>,
}

impl ProxyPool {
    pub fn new(unreachable_after: Duration, evict_after: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                proxies: HashMap::new(),
                next_id: 1,
                next_seq: 0,
            })),
            unreachable_after,
            evict_after,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register a proxy. Returns its pool id.
    pub fn register(&self, conn_id: ConnId, relay_addr: String, pool_size: u32) -> ProxyId {
        let mut inner = self.inner.write();
        let proxy_id = inner.next_id;
        inner.next_id += 1;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        info!(proxy_id, relay_addr = %relay_addr, pool_size, "proxy registered");
        inner.proxies.insert(
            proxy_id,
            ProxyEntry {
                proxy_id,
                conn_id: Some(conn_id),
                relay_addr,
                pool_size,
                current_load: 0,
                reported_sessions: 0,
                seq,
                last_heartbeat: Instant::now(),
                reachable: true,
                builtin: false,
            },
        );
        inner.publish_gauges();
        proxy_id
    }

    /// Register the router's built-in relay as a permanent pool member.
    pub fn register_builtin(&self, relay_addr: String, pool_size: u32) -> ProxyId {
        let mut inner = self.inner.write();
        let proxy_id = inner.next_id;
        inner.next_id += 1;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        info!(proxy_id, relay_addr = %relay_addr, pool_size, "built-in relay registered");
        inner.proxies.insert(
            proxy_id,
            ProxyEntry {
                proxy_id,
                conn_id: None,
                relay_addr,
                pool_size,
                current_load: 0,
                reported_sessions: 0,
                seq,
                last_heartbeat: Instant::now(),
                reachable: true,
                builtin: true,
            },
        );
        inner.publish_gauges();
        proxy_id
    }

    /// Remove a proxy. Existing sessions keep their slots until the
    /// guard drops; the entry just stops being selectable.
    pub fn unregister(&self, proxy_id: ProxyId) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.proxies.remove(&proxy_id).is_some();
        if removed {
            info!(proxy_id, "proxy unregistered");
            inner.publish_gauges();
        }
        removed
    }

    /// Remove the proxy registered by a given control connection.
    pub fn unregister_by_conn(&self, conn_id: ConnId) -> Option<ProxyId> {
        let mut inner = self.inner.write();
        let proxy_id = inner
            .proxies
            .values()
            .find(|p| p.conn_id == Some(conn_id))
            .map(|p| p.proxy_id)?;
        inner.proxies.remove(&proxy_id);
        info!(proxy_id, conn_id, "proxy unregistered with its connection");
        inner.publish_gauges();
        Some(proxy_id)
    }

    /// Record a heartbeat. An unreachable proxy becomes selectable again.
    pub fn heartbeat(&self, proxy_id: ProxyId, reported_sessions: u32) -> bool {
        let mut inner = self.inner.write();
        match inner.proxies.get_mut(&proxy_id) {
            Some(entry) => {
                entry.last_heartbeat = Instant::now();
                entry.reported_sessions = reported_sessions;
                if !entry.reachable {
                    info!(proxy_id, "proxy reachable again");
                    entry.reachable = true;
                }
                inner.publish_gauges();
                true
            }
            None => false,
        }
    }

    /// Reserve a slot on the least-loaded reachable proxy.
    ///
    /// Selection compares load ratios without floating point
    /// (`a.load * b.size` vs `b.load * a.size`); ties go to the earlier
    /// registration. Returns `None` when every proxy is full or
    /// unreachable; the caller rejects the session rather than waiting.
    pub fn select_for_session(&self) -> Option<ProxySlot> {
        let mut inner = self.inner.write();
        let best = inner
            .proxies
            .values()
            .filter(|p| p.selectable())
            .min_by(|a, b| {
                let lhs = a.current_load as u64 * b.pool_size as u64;
                let rhs = b.current_load as u64 * a.pool_size as u64;
                lhs.cmp(&rhs).then(a.seq.cmp(&b.seq))
            })
            .map(|p| p.proxy_id)?;

        let entry = inner.proxies.get_mut(&best)?;
        entry.current_load += 1;
        debug!(
            proxy_id = best,
            load = entry.current_load,
            pool_size = entry.pool_size,
            "relay slot reserved"
        );
        let slot = ProxySlot {
            pool: self.inner.clone(),
            proxy_id: best,
            relay_addr: entry.relay_addr.clone(),
        };
        inner.publish_gauges();
        Some(slot)
    }

    /// Sweep heartbeats: mark silent proxies unreachable, evict the
    /// long-dead. Runs until shutdown is signalled.
    pub fn start_sweeper(&self, interval: Duration) {
        let inner = self.inner.clone();
        let unreachable_after = self.unreachable_after;
        let evict_after = self.evict_after;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!("proxy pool sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let now = Instant::now();
                        let mut inner = inner.write();
                        let mut evict = Vec::new();
                        for entry in inner.proxies.values_mut() {
                            if entry.builtin {
                                continue;
                            }
                            let silent = now.duration_since(entry.last_heartbeat);
                            if entry.reachable && silent >= unreachable_after {
                                warn!(proxy_id = entry.proxy_id, silent_secs = silent.as_secs(), "proxy unreachable");
                                entry.reachable = false;
                            }
                            if silent >= evict_after {
                                evict.push(entry.proxy_id);
                            }
                        }
                        for proxy_id in evict {
                            warn!(proxy_id, "evicting dead proxy");
                            inner.proxies.remove(&proxy_id);
                        }
                        inner.publish_gauges();
                    }
                }
            }
        });
    }

    /// Signal shutdown to the sweeper task.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn snapshot(&self) -> Vec<ProxySnapshot> {
        self.inner
            .read()
            .proxies
            .values()
            .map(|p| ProxySnapshot {
                proxy_id: p.proxy_id,
                relay_addr: p.relay_addr.clone(),
                pool_size: p.pool_size,
                current_load: p.current_load,
                reported_sessions: p.reported_sessions,
                reachable: p.reachable,
                builtin: p.builtin,
            })
            .collect()
    }

    #[cfg(test)]
    fn load_of(&self, proxy_id: ProxyId) -> Option<u32> {
        self.inner
            .read()
            .proxies
            .get(&proxy_id)
            .map(|p| p.current_load)
    }

    #[cfg(test)]
    fn mark_silent_for(&self, proxy_id: ProxyId, silence: Duration) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.proxies.get_mut(&proxy_id) {
            entry.last_heartbeat = Instant::now() - silence;
        }
    }

    #[cfg(test)]
    fn sweep_once(&self) {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let mut evict = Vec::new();
        for entry in inner.proxies.values_mut() {
            if entry.builtin {
                continue;
            }
            let silent = now.duration_since(entry.last_heartbeat);
            if silent >= self.unreachable_after {
                entry.reachable = false;
            }
            if silent >= self.evict_after {
                evict.push(entry.proxy_id);
            }
        }
        for proxy_id in evict {
            inner.proxies.remove(&proxy_id);
        }
    }
}

impl Drop for ProxyPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A reserved relay slot. Dropping it releases the load.
pub struct ProxySlot {
    pool: Arc<RwLock<Inner>>,
    proxy_id: ProxyId,
    relay_addr: String,
}

impl ProxySlot {
    pub fn proxy_id(&self) -> ProxyId {
        self.proxy_id
    }

    pub fn relay_addr(&self) -> &str {
        &self.relay_addr
    }
}

impl Drop for ProxySlot {
    fn drop(&mut self) {
        let mut inner = self.pool.write();
        if let Some(entry) = inner.proxies.get_mut(&self.proxy_id) {
            entry.current_load = entry.current_load.saturating_sub(1);
        }
        inner.publish_gauges();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ProxyPool {
        ProxyPool::new(Duration::from_secs(45), Duration::from_secs(300))
    }

    #[test]
    fn selects_least_load_ratio() {
        let pool = pool();
        let small = pool.register(1, "relay-a:8070".into(), 2);
        let big = pool.register(2, "relay-b:8070".into(), 10);

        // Both empty: tie broken by registration order.
        let s1 = pool.select_for_session().unwrap();
        assert_eq!(s1.proxy_id(), small);

        // small now at 1/2, big at 0/10.
        let s2 = pool.select_for_session().unwrap();
        assert_eq!(s2.proxy_id(), big);

        // small 1/2 vs big 1/10: big wins.
        let s3 = pool.select_for_session().unwrap();
        assert_eq!(s3.proxy_id(), big);
    }

    #[test]
    fn slot_drop_releases_load() {
        let pool = pool();
        let id = pool.register(1, "relay:8070".into(), 1);

        let slot = pool.select_for_session().unwrap();
        assert_eq!(pool.load_of(id), Some(1));
        assert!(pool.select_for_session().is_none());

        drop(slot);
        assert_eq!(pool.load_of(id), Some(0));
        assert!(pool.select_for_session().is_some());
    }

    #[test]
    fn full_pool_rejects_without_waiting() {
        let pool = pool();
        pool.register(1, "relay:8070".into(), 2);
        let _a = pool.select_for_session().unwrap();
        let _b = pool.select_for_session().unwrap();
        assert!(pool.select_for_session().is_none());
    }

    #[test]
    fn silent_proxy_excluded_then_evicted() {
        let pool = pool();
        let id = pool.register(1, "relay:8070".into(), 4);

        pool.mark_silent_for(id, Duration::from_secs(60));
        pool.sweep_once();
        assert!(pool.select_for_session().is_none());
        assert_eq!(pool.snapshot().len(), 1);

        // Heartbeat brings it back.
        assert!(pool.heartbeat(id, 0));
        assert!(pool.select_for_session().is_some());

        pool.mark_silent_for(id, Duration::from_secs(400));
        pool.sweep_once();
        assert!(pool.snapshot().is_empty());
    }

    #[test]
    fn builtin_relay_ignores_sweep() {
        let pool = pool();
        let id = pool.register_builtin("127.0.0.1:8070".into(), 8);
        pool.mark_silent_for(id, Duration::from_secs(1000));
        pool.sweep_once();
        assert_eq!(pool.snapshot().len(), 1);
        assert!(pool.select_for_session().is_some());
    }

    #[test]
    fn unregister_by_conn_finds_entry() {
        let pool = pool();
        pool.register(7, "relay:8070".into(), 4);
        assert!(pool.unregister_by_conn(7).is_some());
        assert!(pool.unregister_by_conn(7).is_none());
    }

    #[tokio::test]
    async fn concurrent_reserve_respects_pool_size() {
        let pool = Arc::new(pool());
        pool.register(1, "relay:8070".into(), 16);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let slot = pool.select_for_session();
                tokio::time::sleep(Duration::from_millis(5)).await;
                slot.is_some()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert!(granted <= 16);
        // All slots dropped: pool fully free again.
        assert_eq!(pool.load_of(1), Some(0));
    }
}
