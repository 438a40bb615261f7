//! # rondo
//!
//! A rendezvous and relay router for remote access peers.
//!
//! Hosts register for stable ids, clients ask to reach them, and the
//! router matches the two over a relay selected from its proxy pool.
//! Session payload stays opaque end to end.
//!
//! ## Crates
//!
//! - [`rondo_core`] - Core constants, error classification, relay loop
//! - [`rondo_proto`] - Wire framing, messages, sealed envelope
//! - [`rondo_auth`] - User store, credential checks, failure throttle
//! - [`rondo_config`] - Configuration loading and validation
//! - [`rondo_metrics`] - Prometheus-compatible metrics
//! - [`rondo_router`] - The router itself

pub use rondo_auth as auth;
pub use rondo_config as config;
pub use rondo_core as core;
pub use rondo_metrics as metrics;
pub use rondo_proto as proto;
pub use rondo_router as router;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use rondo_auth::{NewUser, UserStore};
    pub use rondo_config::{load_config, validate_config, Config};
    pub use rondo_router::{
        run, run_with_shutdown, CancellationToken, Management, RouterError, RouterState,
    };
}
