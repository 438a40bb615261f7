//! Router error type.

use rondo_auth::AuthError;
use rondo_core::errors::{
    ERROR_AUTH, ERROR_CAPACITY, ERROR_CONFIG, ERROR_CRYPTO, ERROR_NETWORK, ERROR_PROTOCOL,
    ERROR_TIMEOUT,
};
use rondo_proto::{ErrorCode, ProtoError};

/// Router error type.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("proto: {0}")]
    Proto(#[from] ProtoError),
    #[error("auth: {0}")]
    Auth(#[from] AuthError),
    #[error("host not found")]
    HostNotFound,
    #[error("no relay capacity")]
    NoCapacity,
    #[error("session already exists for this client/host pair")]
    SessionAlreadyExists,
    #[error("peer is gone")]
    PeerGone,
    #[error("config: {0}")]
    Config(String),
    #[error("operation timed out")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
}

impl RouterError {
    /// Error class label for metrics.
    pub fn class(&self) -> &'static str {
        match self {
            RouterError::Io(_) | RouterError::ConnectionClosed | RouterError::PeerGone => {
                ERROR_NETWORK
            }
            RouterError::Proto(ProtoError::Seal(_)) => ERROR_CRYPTO,
            RouterError::Proto(_) | RouterError::ProtocolViolation(_) => ERROR_PROTOCOL,
            RouterError::Auth(_) => ERROR_AUTH,
            RouterError::HostNotFound
            | RouterError::NoCapacity
            | RouterError::SessionAlreadyExists => ERROR_CAPACITY,
            RouterError::Config(_) => ERROR_CONFIG,
            RouterError::Timeout => ERROR_TIMEOUT,
        }
    }

    /// Wire-level code sent to the peer.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RouterError::Io(e) => net_error_code(e),
            RouterError::ConnectionClosed => ErrorCode::RemoteClosed,
            RouterError::PeerGone => ErrorCode::RemoteClosed,
            RouterError::Proto(ProtoError::Seal(_)) => ErrorCode::CryptoFailure,
            RouterError::Proto(_) | RouterError::ProtocolViolation(_) => {
                ErrorCode::ProtocolViolation
            }
            RouterError::Auth(e) => e.external_code(),
            RouterError::HostNotFound => ErrorCode::HostNotFound,
            RouterError::NoCapacity => ErrorCode::NoCapacity,
            RouterError::SessionAlreadyExists => ErrorCode::SessionAlreadyExists,
            RouterError::Config(_) => ErrorCode::Unknown,
            RouterError::Timeout => ErrorCode::ConnectionTimedOut,
        }
    }

    /// Whether the peer's connection survives this error.
    ///
    /// Capacity-class failures reject one request; the peer stays
    /// connected and may retry. Everything else ends the connection.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RouterError::HostNotFound
                | RouterError::NoCapacity
                | RouterError::SessionAlreadyExists
        )
    }
}

/// Map a socket error onto the wire taxonomy.
pub fn net_error_code(err: &std::io::Error) -> ErrorCode {
    use rondo_core::errors::NetKind;
    match NetKind::classify(err) {
        NetKind::Refused => ErrorCode::ConnectionRefused,
        NetKind::Reset => ErrorCode::NetworkError,
        NetKind::TimedOut => ErrorCode::ConnectionTimedOut,
        NetKind::Closed => ErrorCode::RemoteClosed,
        NetKind::AddrInUse => ErrorCode::AddressInUse,
        NetKind::NotFound => ErrorCode::AddressNotFound,
        NetKind::Unknown => ErrorCode::NetworkError,
    }
}
