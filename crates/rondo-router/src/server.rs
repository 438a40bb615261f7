//! Control-plane server loop and connection handling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::error::RouterError;
use crate::forward::RelayHub;
use crate::handshake::{perform_handshake, AuthenticatedPeer};
use crate::peers::{ConnId, PeerInfo};
use crate::pool::ProxyId;
use crate::state::RouterState;
use crate::util::{create_listener, ConnectionGuard, ConnectionTracker};
use rondo_config::Config;
use rondo_core::defaults;
use rondo_metrics::{
    record_auth_failure, record_auth_success, record_connection_accepted,
    record_connection_closed, record_connection_rejected, record_error,
};
use rondo_proto::{ErrorCode, PeerRole, PeerToRouter, RouterToPeer};

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration =
    Duration::from_secs(defaults::DEFAULT_SHUTDOWN_TIMEOUT_SECS);

/// Capacity of a peer's control-channel outbox.
const OUTBOX_CAPACITY: usize = 32;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Run the router with a cancellation token for graceful shutdown.
pub async fn run_with_shutdown(
    config: Config,
    state: Arc<RouterState>,
    shutdown: CancellationToken,
) -> Result<(), RouterError> {
    let listen: SocketAddr = config
        .server
        .listen
        .parse()
        .map_err(|_| RouterError::Config("invalid listen address".into()))?;
    let relay_listen: SocketAddr = config
        .server
        .relay_listen
        .parse()
        .map_err(|_| RouterError::Config("invalid relay listen address".into()))?;

    // Relay data plane. The advertised address falls back to the bound
    // one, which also resolves an ephemeral port.
    let relay_listener = create_listener(relay_listen, config.server.backlog)?;
    let relay_advertise = match &config.server.relay_advertise {
        Some(addr) => addr.clone(),
        None => relay_listener.local_addr()?.to_string(),
    };
    state
        .pool
        .register_builtin(relay_advertise.clone(), config.server.relay_pool_size);
    let hub = RelayHub::new(state.clone());
    let relay_cancel = shutdown.clone();
    tokio::spawn(async move {
        // Without the data plane granted sessions can never attach, so a
        // listener failure takes the whole router down.
        if let Err(err) = hub.run(relay_listener, relay_cancel.clone()).await {
            error!(error = %err, "relay listener failed, shutting down");
            relay_cancel.cancel();
        }
    });

    // Background sweepers.
    state
        .throttle
        .start_cleanup_task(Duration::from_secs(config.auth.cleanup_interval_secs));
    state
        .pool
        .start_sweeper(Duration::from_secs(defaults::DEFAULT_PROXY_HEARTBEAT_SECS));
    state
        .sessions
        .start_sweeper(state.attach_timeout / 2);

    let tracker = ConnectionTracker::new();

    // Connection limiter (None = unlimited)
    let conn_limit: Option<Arc<Semaphore>> = config.server.max_connections.map(|n| {
        info!("max_connections set to {}", n);
        Arc::new(Semaphore::new(n))
    });

    let listener = create_listener(listen, config.server.backlog)?;
    info!(address = %listen, relay = %relay_advertise, backlog = config.server.backlog, "router listening");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }

            result = listener.accept() => {
                let (tcp, peer) = result?;

                // A source that keeps failing authentication is refused
                // before we spend a handshake on it.
                if state.throttle.is_blocked(peer.ip()) {
                    debug!(peer = %peer, reason = "auth_throttle", "connection rejected");
                    record_connection_rejected("auth_throttle");
                    drop(tcp);
                    continue;
                }

                let permit: Option<OwnedSemaphorePermit> = match &conn_limit {
                    Some(sem) => match sem.clone().try_acquire_owned() {
                        Ok(p) => Some(p),
                        Err(_) => {
                            debug!(peer = %peer, reason = "max_connections", "connection rejected");
                            record_connection_rejected("max_connections");
                            drop(tcp);
                            continue;
                        }
                    },
                    None => None,
                };

                let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %peer, conn_id, "new connection");

                let state = state.clone();
                let conn_cancel = shutdown.child_token();
                tracker.increment();
                let guard = ConnectionGuard::new(tracker.clone());

                tokio::spawn(async move {
                    let _guard = guard; // ensure decrement on drop
                    let _permit = permit; // hold permit until connection closes
                    record_connection_accepted();

                    let result = handle_connection(state.clone(), tcp, peer, conn_id, conn_cancel).await;

                    state.connection_closed(conn_id);
                    record_connection_closed();

                    if let Err(ref err) = result {
                        record_error(err.class());
                        debug!(peer = %peer, conn_id, error = %err, "connection closed with error");
                    } else {
                        debug!(peer = %peer, conn_id, "connection closed");
                    }
                });
            }
        }
    }

    state.shutdown_tasks();

    // Graceful drain: wait for active connections
    let active = tracker.count();
    if active > 0 {
        info!("waiting for {} active connections to drain", active);
        if tracker.wait_for_zero(DEFAULT_SHUTDOWN_TIMEOUT).await {
            info!("all connections drained");
        } else {
            warn!(
                "shutdown timeout, {} connections still active",
                tracker.count()
            );
        }
    }

    info!("router stopped");
    Ok(())
}

/// Run the router (blocking until error, no graceful shutdown).
pub async fn run(config: Config, state: Arc<RouterState>) -> Result<(), RouterError> {
    run_with_shutdown(config, state, CancellationToken::new()).await
}

/// One connection: handshake, registration, message loop.
async fn handle_connection(
    state: Arc<RouterState>,
    tcp: TcpStream,
    peer_addr: SocketAddr,
    conn_id: ConnId,
    cancel: CancellationToken,
) -> Result<(), RouterError> {
    let mut channel = Channel::new(tcp);

    let authed = match tokio::time::timeout(
        state.handshake_timeout,
        perform_handshake(&mut channel, &state.users),
    )
    .await
    {
        Ok(Ok(authed)) => authed,
        Ok(Err(err)) => {
            if let RouterError::Auth(ref auth_err) = err {
                state.throttle.record_failure(peer_addr.ip());
                record_auth_failure(auth_err.reason());
            } else {
                record_auth_failure(err.class());
            }
            return Err(err);
        }
        Err(_) => {
            warn!(peer = %peer_addr, conn_id, "handshake timed out");
            record_auth_failure("timeout");
            return Err(RouterError::Timeout);
        }
    };

    let AuthenticatedPeer { role, user } = authed;
    record_auth_success(match role {
        PeerRole::Host => "host",
        PeerRole::Client => "client",
        PeerRole::Proxy => "proxy",
    });
    info!(peer = %peer_addr, conn_id, role = %role, user = %user.name, "peer authenticated");

    let (tx, mut rx) = mpsc::channel::<RouterToPeer>(OUTBOX_CAPACITY);
    state.peers.insert(PeerInfo {
        conn_id,
        addr: peer_addr,
        role,
        user: user.name.clone(),
        host_id: None,
        cancel: cancel.clone(),
        sender: tx.clone(),
    });
    state.notify_peer_count();

    let mut proxy_id: Option<ProxyId> = None;
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(conn_id, "connection cancelled");
                let _ = channel
                    .send(&RouterToPeer::Error {
                        code: ErrorCode::ShuttingDown,
                    })
                    .await;
                return Ok(());
            }

            outbound = rx.recv() => {
                // The registry holds a sender clone, so the channel
                // cannot be closed while the peer entry exists.
                if let Some(msg) = outbound {
                    channel.send(&msg).await?;
                }
            }

            inbound = channel.recv::<PeerToRouter>() => {
                match inbound {
                    Ok(msg) => {
                        handle_message(&state, conn_id, role, &user.name, &tx, &mut channel, &mut proxy_id, msg)
                            .await?;
                    }
                    Err(RouterError::ConnectionClosed) => {
                        debug!(conn_id, "peer closed the control channel");
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

/// Dispatch one authenticated control message.
///
/// Recoverable refusals answer with an error code and keep the
/// connection; everything else propagates and closes it.
#[allow(clippy::too_many_arguments)]
async fn handle_message<S>(
    state: &RouterState,
    conn_id: ConnId,
    role: PeerRole,
    username: &str,
    sender: &mpsc::Sender<RouterToPeer>,
    channel: &mut Channel<S>,
    proxy_id: &mut Option<ProxyId>,
    msg: PeerToRouter,
) -> Result<(), RouterError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match (role, msg) {
        (PeerRole::Host, PeerToRouter::HostIdRequest { request }) => {
            match state.peers.bind_host(conn_id, &request) {
                Ok((host_id, key)) => {
                    channel
                        .send(&RouterToPeer::HostIdResponse { host_id, key })
                        .await
                }
                Err(err) if err.is_recoverable() => {
                    channel
                        .send(&RouterToPeer::Error {
                            code: err.error_code(),
                        })
                        .await
                }
                Err(err) => Err(err),
            }
        }

        (PeerRole::Client, PeerToRouter::SessionRequest {
            host_id,
            session_type,
        }) => {
            match state.request_session(conn_id, sender, username, host_id, session_type) {
                Ok(offer) => channel.send(&offer).await,
                Err(err) if err.is_recoverable() => {
                    debug!(conn_id, error = %err, "session request refused");
                    record_error(err.class());
                    channel
                        .send(&RouterToPeer::Error {
                            code: err.error_code(),
                        })
                        .await
                }
                Err(err) => {
                    // Authorization may have been revoked mid-connection.
                    let _ = channel
                        .send(&RouterToPeer::Error {
                            code: err.error_code(),
                        })
                        .await;
                    Err(err)
                }
            }
        }

        (PeerRole::Proxy, PeerToRouter::ProxyRegister {
            relay_addr,
            pool_size,
        }) => {
            if proxy_id.is_some() {
                return Err(RouterError::ProtocolViolation("proxy registered twice"));
            }
            let id = state.pool.register(conn_id, relay_addr, pool_size);
            *proxy_id = Some(id);
            channel
                .send(&RouterToPeer::ProxyRegistered { proxy_id: id })
                .await
        }

        (PeerRole::Proxy, PeerToRouter::ProxyHeartbeat { active_sessions }) => {
            let id = proxy_id.ok_or(RouterError::ProtocolViolation(
                "heartbeat before registration",
            ))?;
            if !state.pool.heartbeat(id, active_sessions) {
                return Err(RouterError::PeerGone);
            }
            channel.send(&RouterToPeer::HeartbeatAck).await
        }

        (_, other) => {
            warn!(conn_id, role = %role, message = ?other, "message not allowed for role");
            let _ = channel
                .send(&RouterToPeer::Error {
                    code: ErrorCode::ProtocolViolation,
                })
                .await;
            Err(RouterError::ProtocolViolation("message not allowed for role"))
        }
    }
}
