//! Typed wire messages exchanged between peers and the router.
//!
//! Messages are serialized with bincode for compact binary framing. The
//! handshake starts in cleartext (`Hello`, `HelloAck`, `KeyExchange`);
//! everything after key agreement travels inside the sealed envelope.

use serde::{Deserialize, Serialize};

use crate::frame::FrameError;
use crate::seal::SealError;

/// Role a peer announces in its hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Host,
    Client,
    Proxy,
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerRole::Host => write!(f, "host"),
            PeerRole::Client => write!(f, "client"),
            PeerRole::Proxy => write!(f, "proxy"),
        }
    }
}

/// Kind of remote-access activity a session carries. Gates authorization
/// per user: a user may be allowed desktop viewing but not file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    DesktopManage,
    DesktopView,
    FileTransfer,
    SystemInfo,
    TextChat,
}

impl SessionType {
    /// All session types, in a stable order.
    pub const ALL: [SessionType; 5] = [
        SessionType::DesktopManage,
        SessionType::DesktopView,
        SessionType::FileTransfer,
        SessionType::SystemInfo,
        SessionType::TextChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::DesktopManage => "desktop_manage",
            SessionType::DesktopView => "desktop_view",
            SessionType::FileTransfer => "file_transfer",
            SessionType::SystemInfo => "system_info",
            SessionType::TextChat => "text_chat",
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host id issuance request.
///
/// A freshly installed host asks for a new id and receives a key it must
/// persist; a host that already holds a key presents it to re-bind to the
/// same id after reconnecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostIdVariant {
    NewId,
    ExistingId { key: Vec<u8> },
}

/// Peer -> Router messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerToRouter {
    Hello {
        role: PeerRole,
        protocol_version: u32,
    },
    KeyExchange {
        public_key: [u8; 32],
    },
    PasswordCredentials {
        username: String,
        /// SHA-256 hex of the password.
        password_hash: String,
        /// Required for clients; hosts and proxies omit it.
        session_type: Option<SessionType>,
    },
    KeyCredentials {
        username: String,
        public_key: [u8; 32],
        /// Ed25519 signature over the challenge from `HelloAck`.
        signature: Vec<u8>,
        /// Required for clients; hosts and proxies omit it.
        session_type: Option<SessionType>,
    },
    HostIdRequest {
        request: HostIdVariant,
    },
    SessionRequest {
        host_id: u64,
        session_type: SessionType,
    },
    ProxyRegister {
        /// Address peers should connect to for relayed sessions.
        relay_addr: String,
        /// Maximum concurrent relayed sessions this proxy accepts.
        pool_size: u32,
    },
    ProxyHeartbeat {
        active_sessions: u32,
    },
}

/// Router -> Peer messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RouterToPeer {
    HelloAck {
        protocol_version: u32,
        /// Router's ephemeral X25519 public key.
        public_key: [u8; 32],
        /// Challenge to be signed by key-credential peers.
        challenge: [u8; 32],
    },
    AuthOk,
    HostIdResponse {
        host_id: u64,
        /// Present only for `NewId` requests; the host must persist it.
        key: Option<Vec<u8>>,
    },
    SessionOffer {
        session_id: u64,
        relay_addr: String,
        /// Per-session key both legs present to the relay.
        relay_key: [u8; 32],
    },
    SessionClosed {
        session_id: u64,
        reason: ErrorCode,
    },
    ProxyRegistered {
        proxy_id: u64,
    },
    HeartbeatAck,
    Error {
        code: ErrorCode,
    },
}

/// Preamble a leg sends after connecting to its assigned relay endpoint.
///
/// The relay matches the two legs of a session by id and key, confirms
/// attachment to the session router, then forwards opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayAttach {
    pub session_id: u64,
    /// The per-session key from the `SessionOffer`.
    pub key: [u8; 32],
    /// Which leg this connection is. Validated against the session.
    pub role: PeerRole,
}

/// Deserialize a `RelayAttach` preamble.
pub fn decode_relay_attach(bytes: &[u8]) -> Result<RelayAttach, ProtoError> {
    bincode::deserialize(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
}

/// Flat error codes surfaced to peers and the management collaborator.
///
/// The UI layer owns translation into user-facing text; the core never
/// sends prose. Credential failures all collapse to `AccessDenied` so the
/// wire does not reveal which check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unknown,
    NetworkError,
    ConnectionRefused,
    ConnectionTimedOut,
    RemoteClosed,
    AddressInUse,
    AddressNotFound,
    CryptoFailure,
    AccessDenied,
    ProtocolViolation,
    SessionTypeNotAllowed,
    HostNotFound,
    NoCapacity,
    SessionAlreadyExists,
    SessionIdle,
    ShuttingDown,
}

/// Protocol-level error: framing, serialization, or envelope failure.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("encode: {0}")]
    Encode(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("seal: {0}")]
    Seal(#[from] SealError),
}

/// Serialize a message to bytes.
pub fn encode_message<M: Serialize>(msg: &M) -> Result<Vec<u8>, ProtoError> {
    bincode::serialize(msg).map_err(|e| ProtoError::Encode(e.to_string()))
}

/// Deserialize a `PeerToRouter` message.
pub fn decode_peer_message(bytes: &[u8]) -> Result<PeerToRouter, ProtoError> {
    bincode::deserialize(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
}

/// Deserialize a `RouterToPeer` message.
pub fn decode_router_message(bytes: &[u8]) -> Result<RouterToPeer, ProtoError> {
    bincode::deserialize(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
}
