//! Per-source authentication failure throttling.
//!
//! Not a full rate limiter: the router only refuses to keep talking to a
//! source that keeps failing authentication. Successful handshakes are
//! never counted.

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Clone)]
struct FailureEntry {
    count: u32,
    window_start: Instant,
}

/// Tracks authentication failures per source IP in a sliding window.
pub struct FailureThrottle {
    entries: Arc<RwLock<HashMap<IpAddr, FailureEntry>>>,
    /// Failures allowed per IP within the window before blocking.
    max_failures: u32,
    window: Duration,
    shutdown: Arc<Notify>,
}

impl FailureThrottle {
    pub fn new(max_failures: u32, window_secs: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_failures,
            window: Duration::from_secs(window_secs),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Start the background cleanup task for expired windows.
    pub fn start_cleanup_task(&self, cleanup_interval: Duration) {
        let entries = self.entries.clone();
        let window = self.window;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!("failure throttle cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {
                        let now = Instant::now();
                        let mut map = entries.write();
                        let before = map.len();
                        map.retain(|_, entry| now.duration_since(entry.window_start) < window);
                        let removed = before - map.len();
                        if removed > 0 {
                            debug!(removed, remaining = map.len(), "throttle entries cleaned up");
                        }
                    }
                }
            }
        });
    }

    /// Whether handshakes from this source should be refused outright.
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        let map = self.entries.read();
        match map.get(&ip) {
            Some(entry) => {
                entry.count >= self.max_failures
                    && entry.window_start.elapsed() < self.window
            }
            None => false,
        }
    }

    /// Count one authentication failure from this source.
    pub fn record_failure(&self, ip: IpAddr) {
        let now = Instant::now();
        let mut map = self.entries.write();
        match map.get_mut(&ip) {
            Some(entry) => {
                if now.duration_since(entry.window_start) >= self.window {
                    entry.count = 1;
                    entry.window_start = now;
                } else {
                    entry.count = entry.count.saturating_add(1);
                }
            }
            None => {
                map.insert(
                    ip,
                    FailureEntry {
                        count: 1,
                        window_start: now,
                    },
                );
            }
        }
    }

    /// Signal shutdown to the cleanup task.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for FailureThrottle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit() {
        let throttle = FailureThrottle::new(3, 60);
        let ip: IpAddr = "192.0.2.10".parse().unwrap();

        assert!(!throttle.is_blocked(ip));
        for _ in 0..3 {
            throttle.record_failure(ip);
        }
        assert!(throttle.is_blocked(ip));
    }

    #[test]
    fn sources_are_independent() {
        let throttle = FailureThrottle::new(1, 60);
        let bad: IpAddr = "192.0.2.10".parse().unwrap();
        let good: IpAddr = "192.0.2.11".parse().unwrap();

        throttle.record_failure(bad);
        assert!(throttle.is_blocked(bad));
        assert!(!throttle.is_blocked(good));
    }

    #[test]
    fn window_expiry_resets_count() {
        // Zero-length window: every failure starts a new window.
        let throttle = FailureThrottle::new(1, 0);
        let ip: IpAddr = "192.0.2.10".parse().unwrap();

        throttle.record_failure(ip);
        throttle.record_failure(ip);
        assert!(!throttle.is_blocked(ip));
    }
}
