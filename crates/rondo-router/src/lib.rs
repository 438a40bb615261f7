//! The rondo router core.
//!
//! Accepts peer connections, authenticates them, matches clients to
//! hosts, reserves relay capacity, and forwards session payload through
//! the built-in relay or registered relay proxies. Exposed as a library
//! for integration tests and embedding.

pub mod channel;
pub mod cli;
mod error;
mod forward;
pub mod handshake;
mod manage;
mod peers;
mod pool;
mod server;
mod sessions;
mod state;
mod util;

pub use error::RouterError;
pub use manage::Management;
pub use peers::{ConnId, HostId, PeerRegistry, PeerSnapshot};
pub use pool::{ProxyId, ProxyPool, ProxySnapshot};
pub use server::{run, run_with_shutdown, DEFAULT_SHUTDOWN_TIMEOUT};
pub use sessions::{SessionId, SessionRegistry, SessionSnapshot, SessionState};
pub use state::{Notification, RouterState};
pub use tokio_util::sync::CancellationToken;
