//! Error kind constants and the network error taxonomy.
//!
//! The constants provide consistent error classification for metrics and
//! logging across all crates. `NetKind` classifies socket-level failures
//! into the small set of conditions the management surface can display.

use std::io;

/// Protocol parsing/validation error (malformed or oversized frame,
/// version mismatch).
pub const ERROR_PROTOCOL: &str = "protocol";
/// Key exchange or decryption error.
pub const ERROR_CRYPTO: &str = "crypto";
/// Authentication error (bad credentials, disabled user, disallowed type).
pub const ERROR_AUTH: &str = "auth";
/// Capacity error (no proxy slot, host not found, duplicate session).
pub const ERROR_CAPACITY: &str = "capacity";
/// Network-level I/O error.
pub const ERROR_NETWORK: &str = "network";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";

/// Network failure classification.
///
/// One leg of a session failing surfaces as one of these; the paired leg
/// is notified and the session is torn down. The router process never
/// terminates from a single connection's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetKind {
    /// Connection actively refused by the remote end.
    Refused,
    /// Connection reset mid-stream.
    Reset,
    /// Operation exceeded its deadline.
    TimedOut,
    /// Remote closed the connection (clean EOF treated as closure).
    Closed,
    /// Local address already in use.
    AddrInUse,
    /// Address could not be resolved or reached.
    NotFound,
    /// Anything else.
    Unknown,
}

impl NetKind {
    /// Classify a socket-level error.
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetKind::Refused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => NetKind::Reset,
            io::ErrorKind::TimedOut => NetKind::TimedOut,
            io::ErrorKind::ConnectionAborted | io::ErrorKind::UnexpectedEof => NetKind::Closed,
            io::ErrorKind::AddrInUse => NetKind::AddrInUse,
            io::ErrorKind::AddrNotAvailable | io::ErrorKind::NotFound => NetKind::NotFound,
            _ => NetKind::Unknown,
        }
    }

    /// Stable label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetKind::Refused => "refused",
            NetKind::Reset => "reset",
            NetKind::TimedOut => "timed_out",
            NetKind::Closed => "closed",
            NetKind::AddrInUse => "addr_in_use",
            NetKind::NotFound => "not_found",
            NetKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for NetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_common_kinds() {
        let cases = [
            (io::ErrorKind::ConnectionRefused, NetKind::Refused),
            (io::ErrorKind::ConnectionReset, NetKind::Reset),
            (io::ErrorKind::BrokenPipe, NetKind::Reset),
            (io::ErrorKind::TimedOut, NetKind::TimedOut),
            (io::ErrorKind::UnexpectedEof, NetKind::Closed),
            (io::ErrorKind::AddrInUse, NetKind::AddrInUse),
            (io::ErrorKind::AddrNotAvailable, NetKind::NotFound),
            (io::ErrorKind::PermissionDenied, NetKind::Unknown),
        ];
        for (kind, expected) in cases {
            let err = io::Error::new(kind, "test");
            assert_eq!(NetKind::classify(&err), expected);
        }
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(NetKind::Refused.as_str(), "refused");
        assert_eq!(NetKind::TimedOut.to_string(), "timed_out");
    }
}
