//! Core types and constants shared across rondo crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error kind constants and the network error taxonomy
//! - The bidirectional forwarding loop used by the relay data plane

pub mod defaults;
pub mod errors;
pub mod io;

pub use defaults::*;
pub use errors::*;

/// Project name.
pub const PROJECT_NAME: &str = "rondo";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
