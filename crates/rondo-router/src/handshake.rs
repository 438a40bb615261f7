//! Router-side authentication handshake.
//!
//! Stages: hello, key exchange, credential check. The channel starts in
//! cleartext, switches to the sealed envelope as soon as keys are
//! agreed, and carries credentials only inside it. Every refusal sends a
//! flat error code; internal reasons stay in logs. The caller wraps the
//! whole exchange in the configured handshake deadline.

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use crate::channel::Channel;
use crate::error::RouterError;
use rondo_auth::{verify_credential, CredentialProof, User, UserStore};
use rondo_core::{CHALLENGE_LEN, PROTOCOL_VERSION};
use rondo_proto::{
    ErrorCode, KeyExchange, PeerRole, PeerToRouter, RouterToPeer, SessionCrypto,
};

/// Handshake progress, for tracing.
#[derive(Debug, Clone, Copy)]
enum Stage {
    AwaitingHello,
    KeyExchange,
    CredentialCheck,
}

/// Result of a completed handshake.
#[derive(Debug)]
pub struct AuthenticatedPeer {
    pub role: PeerRole,
    pub user: User,
}

/// Drive the handshake to completion on the router side.
///
/// On success the channel is sealed and the peer is authenticated. On
/// failure an error code has been sent where the channel still permits
/// it, and the connection must be dropped for every class except
/// recoverable ones (of which the handshake has none).
pub async fn perform_handshake<S>(
    channel: &mut Channel<S>,
    users: &UserStore,
) -> Result<AuthenticatedPeer, RouterError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    trace!(stage = ?Stage::AwaitingHello, "handshake start");
    let role = match channel.recv::<PeerToRouter>().await? {
        PeerToRouter::Hello {
            role,
            protocol_version,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                debug!(
                    peer_version = protocol_version,
                    our_version = PROTOCOL_VERSION,
                    "protocol version mismatch"
                );
                channel
                    .send(&RouterToPeer::Error {
                        code: ErrorCode::ProtocolViolation,
                    })
                    .await?;
                return Err(RouterError::ProtocolViolation("version mismatch"));
            }
            role
        }
        _ => {
            channel
                .send(&RouterToPeer::Error {
                    code: ErrorCode::ProtocolViolation,
                })
                .await?;
            return Err(RouterError::ProtocolViolation("expected hello"));
        }
    };

    trace!(stage = ?Stage::KeyExchange, role = %role, "hello accepted");
    let kx = KeyExchange::new();
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    channel
        .send(&RouterToPeer::HelloAck {
            protocol_version: PROTOCOL_VERSION,
            public_key: kx.public_key(),
            challenge,
        })
        .await?;

    let peer_public = match channel.recv::<PeerToRouter>().await? {
        PeerToRouter::KeyExchange { public_key } => public_key,
        _ => {
            channel
                .send(&RouterToPeer::Error {
                    code: ErrorCode::ProtocolViolation,
                })
                .await?;
            return Err(RouterError::ProtocolViolation("expected key exchange"));
        }
    };
    let shared = kx.agree(&peer_public);
    // The peer is the initiator of the sealed channel.
    channel.enable_crypto(SessionCrypto::new(&shared, false));

    trace!(stage = ?Stage::CredentialCheck, "channel sealed");
    let (username, proof, session_type) = match channel.recv::<PeerToRouter>().await? {
        PeerToRouter::PasswordCredentials {
            username,
            password_hash,
            session_type,
        } => (
            username,
            CredentialProof::Password { password_hash },
            session_type,
        ),
        PeerToRouter::KeyCredentials {
            username,
            public_key,
            signature,
            session_type,
        } => (
            username,
            CredentialProof::Signature {
                public_key,
                signature,
                challenge,
            },
            session_type,
        ),
        _ => {
            channel
                .send(&RouterToPeer::Error {
                    code: ErrorCode::ProtocolViolation,
                })
                .await?;
            return Err(RouterError::ProtocolViolation("expected credentials"));
        }
    };

    // Clients must name the activity; hosts and proxies must not.
    if role == PeerRole::Client && session_type.is_none() {
        channel
            .send(&RouterToPeer::Error {
                code: ErrorCode::ProtocolViolation,
            })
            .await?;
        return Err(RouterError::ProtocolViolation("client without session type"));
    }

    match verify_credential(users, &username, &proof, session_type).await {
        Ok(user) => {
            debug!(user = %user.name, role = %role, "authenticated");
            channel.send(&RouterToPeer::AuthOk).await?;
            Ok(AuthenticatedPeer { role, user })
        }
        Err(err) => {
            debug!(user = %username, reason = err.reason(), "authentication failed");
            channel
                .send(&RouterToPeer::Error {
                    code: err.external_code(),
                })
                .await?;
            Err(RouterError::Auth(err))
        }
    }
}

/// Peer-side counterpart, used by the test peers and by tooling.
///
/// Performs hello, key exchange, and credential submission; returns the
/// challenge so key-credential callers can be driven in two steps via
/// [`client_key_exchange`].
pub async fn connect_handshake<S>(
    channel: &mut Channel<S>,
    role: PeerRole,
    username: &str,
    password_hash: &str,
    session_type: Option<rondo_proto::SessionType>,
) -> Result<(), RouterError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    client_key_exchange(channel, role).await?;
    channel
        .send(&PeerToRouter::PasswordCredentials {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            session_type,
        })
        .await?;
    match channel.recv::<RouterToPeer>().await? {
        RouterToPeer::AuthOk => Ok(()),
        RouterToPeer::Error { code } => Err(denied(code)),
        _ => Err(RouterError::ProtocolViolation("expected auth result")),
    }
}

/// Peer-side hello + key exchange; leaves the channel sealed and
/// returns the router's challenge.
pub async fn client_key_exchange<S>(
    channel: &mut Channel<S>,
    role: PeerRole,
) -> Result<[u8; CHALLENGE_LEN], RouterError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel
        .send(&PeerToRouter::Hello {
            role,
            protocol_version: PROTOCOL_VERSION,
        })
        .await?;
    let (router_public, challenge) = match channel.recv::<RouterToPeer>().await? {
        RouterToPeer::HelloAck {
            public_key,
            challenge,
            ..
        } => (public_key, challenge),
        RouterToPeer::Error { code } => return Err(denied(code)),
        _ => return Err(RouterError::ProtocolViolation("expected hello ack")),
    };
    let kx = KeyExchange::new();
    channel
        .send(&PeerToRouter::KeyExchange {
            public_key: kx.public_key(),
        })
        .await?;
    let shared = kx.agree(&router_public);
    channel.enable_crypto(SessionCrypto::new(&shared, true));
    Ok(challenge)
}

fn denied(code: ErrorCode) -> RouterError {
    match code {
        ErrorCode::AccessDenied => RouterError::Auth(rondo_auth::AuthError::WrongPassword),
        ErrorCode::SessionTypeNotAllowed => {
            RouterError::Auth(rondo_auth::AuthError::SessionTypeNotAllowed)
        }
        _ => RouterError::ProtocolViolation("handshake refused"),
    }
}
