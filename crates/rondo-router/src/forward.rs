//! Built-in relay data plane.
//!
//! Each leg of a granted session connects here and sends one
//! length-prefixed attach preamble carrying the session id, the offered
//! relay key, and which leg it is. The first valid leg is parked; the
//! second starts the forwarding loop. From that point the relay moves
//! opaque bytes and never inspects payload.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{net_error_code, RouterError};
use crate::sessions::{AttachOutcome, SessionId};
use crate::state::RouterState;
use rondo_core::io::{forward_bidirectional, ForwardMetrics, ForwardOutcome};
use rondo_core::NetKind;
use rondo_proto::{decode_relay_attach, ErrorCode, PeerRole, ProtoError, RelayAttach, MAX_FRAME_BYTES};

/// Prometheus-backed byte counters for the forwarding loop.
struct RelayMetrics;

impl ForwardMetrics for RelayMetrics {
    fn record_client_to_host(&self, bytes: u64) {
        rondo_metrics::record_relay_client_to_host(bytes);
    }
    fn record_host_to_client(&self, bytes: u64) {
        rondo_metrics::record_relay_host_to_client(bytes);
    }
}

struct ParkedLeg {
    stream: TcpStream,
    role: PeerRole,
    since: Instant,
}

/// The relay listener and its parked first legs.
pub struct RelayHub {
    state: Arc<RouterState>,
    parked: Mutex<HashMap<SessionId, ParkedLeg>>,
    attach_timeout: Duration,
}

impl RelayHub {
    pub fn new(state: Arc<RouterState>) -> Arc<Self> {
        let attach_timeout = state.attach_timeout;
        Arc::new(Self {
            state,
            parked: Mutex::new(HashMap::new()),
            attach_timeout,
        })
    }

    /// Accept relay legs until cancelled.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        info!(address = %listener.local_addr()?, "relay listening");
        let prune_interval = self.attach_timeout / 2;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("relay accept loop stopping");
                    break;
                }

                _ = tokio::time::sleep(prune_interval) => {
                    self.prune_parked();
                }

                result = listener.accept() => {
                    let (stream, peer) = result?;
                    let hub = self.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(err) = hub.handle_leg(stream, cancel).await {
                            debug!(peer = %peer, error = %err, "relay leg rejected");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Read the attach preamble and either park the leg or start
    /// forwarding.
    async fn handle_leg(
        self: Arc<Self>,
        mut stream: TcpStream,
        cancel: CancellationToken,
    ) -> Result<(), RouterError> {
        let attach = tokio::time::timeout(self.attach_timeout, read_attach(&mut stream))
            .await
            .map_err(|_| RouterError::Timeout)??;

        // Park and attach under one lock: the partner leg must never see
        // BothAttached before the first leg's stream is in the map.
        let (session_cancel, parked) = {
            let mut parked = self.parked.lock();
            match self
                .state
                .sessions
                .attach(attach.session_id, &attach.key, attach.role)?
            {
                AttachOutcome::FirstLeg => {
                    parked.insert(
                        attach.session_id,
                        ParkedLeg {
                            stream,
                            role: attach.role,
                            since: Instant::now(),
                        },
                    );
                    return Ok(());
                }
                AttachOutcome::BothAttached(session_cancel) => {
                    match parked.remove(&attach.session_id) {
                        Some(leg) => (session_cancel, leg),
                        None => {
                            drop(parked);
                            // The partner's stream was pruned. Close the
                            // session so the slot is released instead of
                            // leaving it active with no forwarder.
                            self.state
                                .close_session(attach.session_id, ErrorCode::RemoteClosed);
                            return Err(RouterError::PeerGone);
                        }
                    }
                }
            }
        };

        let (client_leg, host_leg) = if attach.role == PeerRole::Client {
            (stream, parked.stream)
        } else {
            debug_assert_eq!(parked.role, PeerRole::Client);
            (parked.stream, stream)
        };
        let hub = self.clone();
        tokio::spawn(async move {
            hub.forward_session(attach.session_id, client_leg, host_leg, session_cancel, cancel)
                .await;
        });
        Ok(())
    }

    async fn forward_session(
        &self,
        session_id: SessionId,
        client_leg: TcpStream,
        host_leg: TcpStream,
        session_cancel: CancellationToken,
        shutdown: CancellationToken,
    ) {
        // Either the session's own teardown or router shutdown stops the
        // loop. Every exit path below closes the session, which cancels
        // its token, so the watcher task always terminates.
        let stop = CancellationToken::new();
        {
            let stop = stop.clone();
            let session_cancel = session_cancel.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = session_cancel.cancelled() => {}
                    _ = shutdown.cancelled() => {}
                }
                stop.cancel();
            });
        }

        let result = forward_bidirectional(
            client_leg,
            host_leg,
            self.state.idle_session_timeout,
            self.state.relay_buffer_size,
            &stop,
            &RelayMetrics,
        )
        .await;

        match result {
            Ok(ForwardOutcome::Finished) => {
                debug!(session_id, "relay finished, both legs at EOF");
                self.state.close_session(session_id, ErrorCode::RemoteClosed);
            }
            Ok(ForwardOutcome::IdleTimeout) => {
                warn!(session_id, "session idle, closing");
                self.state.close_session(session_id, ErrorCode::SessionIdle);
            }
            Ok(ForwardOutcome::Cancelled) => {
                // Teardown already in progress; close is idempotent.
                self.state.close_session(session_id, ErrorCode::ShuttingDown);
            }
            Err(err) => {
                let kind = NetKind::classify(&err);
                warn!(session_id, error = %err, kind = %kind, "relay leg failed");
                self.state.close_session(session_id, net_error_code(&err));
            }
        }
    }

    /// Drop parked legs whose partner never arrived. The session
    /// registry's own sweep closes the matching session.
    fn prune_parked(&self) {
        let mut parked = self.parked.lock();
        let before = parked.len();
        let timeout = self.attach_timeout;
        parked.retain(|_, leg| leg.since.elapsed() < timeout);
        let dropped = before - parked.len();
        if dropped > 0 {
            debug!(dropped, "pruned stale parked relay legs");
        }
    }
}

/// Read one length-prefixed attach preamble without over-reading: any
/// bytes after the preamble belong to the session payload.
async fn read_attach(stream: &mut TcpStream) -> Result<RelayAttach, RouterError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ProtoError::Frame(rondo_proto::FrameError::Oversize(len)).into());
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(decode_relay_attach(&body)?)
}
