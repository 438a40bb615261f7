//! I/O building blocks for the relay data plane.

mod relay;

pub use relay::{forward_bidirectional, ForwardMetrics, ForwardOutcome, NoOpMetrics};
