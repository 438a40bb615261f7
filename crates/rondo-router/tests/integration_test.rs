//! Integration tests for the router.
//!
//! These tests drive the complete flow over real sockets:
//! - handshake and key agreement
//! - host id issuance and re-binding
//! - session matchmaking and relay offers
//! - payload forwarding through the built-in relay
//! - capacity refusal, throttling, graceful shutdown
#![allow(clippy::tests_outside_test_module)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use rondo_auth::sha256_hex;
use rondo_config::Config;
use rondo_proto::{
    encode_frame, encode_message, ErrorCode, HostIdVariant, PeerRole, PeerToRouter, RelayAttach,
    RouterToPeer, SessionType,
};
use rondo_router::channel::Channel;
use rondo_router::handshake::connect_handshake;
use rondo_router::{run_with_shutdown, CancellationToken, RouterState};

const PASSWORD: &str = "test_password_123";

/// Reserve an ephemeral port by binding and immediately releasing it.
async fn free_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn test_config(listen: SocketAddr, relay_pool_size: u32, failure_limit: u32) -> Config {
    let mut config: Config = toml::from_str(&format!(
        r#"
[server]
listen = "{listen}"
relay_listen = "127.0.0.1:0"
relay_pool_size = {relay_pool_size}

[auth]
failure_limit = {failure_limit}

[[auth.users]]
name = "alice"
password_hash = "placeholder"
session_types = ["desktop_view", "file_transfer"]

[logging]
level = "warn"
"#
    ))
    .unwrap();
    config.auth.users[0].password_hash = Some(sha256_hex(PASSWORD));
    config
}

struct TestRouter {
    addr: SocketAddr,
    state: Arc<RouterState>,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<Result<(), rondo_router::RouterError>>,
}

impl TestRouter {
    async fn start(relay_pool_size: u32, failure_limit: u32) -> Self {
        let addr = free_addr().await;
        let config = test_config(addr, relay_pool_size, failure_limit);
        let state = Arc::new(RouterState::from_config(&config).unwrap());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(run_with_shutdown(
            config,
            state.clone(),
            shutdown.clone(),
        ));

        // Wait for the listener to come up.
        tokio::time::sleep(Duration::from_millis(300)).await;

        Self {
            addr,
            state,
            shutdown,
            handle,
        }
    }

    /// Connect and authenticate a peer.
    async fn peer(
        &self,
        role: PeerRole,
        session_type: Option<SessionType>,
    ) -> Channel<TcpStream> {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        let mut channel = Channel::new(stream);
        connect_handshake(&mut channel, role, "alice", &sha256_hex(PASSWORD), session_type)
            .await
            .unwrap();
        channel
    }
}

/// Register the host and return its issued id and persisted key.
async fn obtain_host_id(host: &mut Channel<TcpStream>) -> (u64, Vec<u8>) {
    host.send(&PeerToRouter::HostIdRequest {
        request: HostIdVariant::NewId,
    })
    .await
    .unwrap();
    match host.recv::<RouterToPeer>().await.unwrap() {
        RouterToPeer::HostIdResponse { host_id, key } => (host_id, key.unwrap()),
        other => panic!("expected host id response, got {:?}", other),
    }
}

fn offered(msg: RouterToPeer) -> (u64, String, [u8; 32]) {
    match msg {
        RouterToPeer::SessionOffer {
            session_id,
            relay_addr,
            relay_key,
        } => (session_id, relay_addr, relay_key),
        other => panic!("expected session offer, got {:?}", other),
    }
}

/// Connect to the relay and send the attach preamble.
async fn attach_leg(relay_addr: &str, session_id: u64, key: [u8; 32], role: PeerRole) -> TcpStream {
    let mut stream = TcpStream::connect(relay_addr).await.unwrap();
    let body = encode_message(&RelayAttach {
        session_id,
        key,
        role,
    })
    .unwrap();
    let mut out = BytesMut::new();
    encode_frame(&body, &mut out).unwrap();
    stream.write_all(&out).await.unwrap();
    stream
}

/// Full rendezvous: host registers, client requests, both legs attach,
/// payload flows through the relay, and teardown notifies the host.
#[tokio::test]
async fn test_rendezvous_and_relay() {
    let router = TestRouter::start(8, 5).await;

    let mut host = router.peer(PeerRole::Host, None).await;
    let (host_id, _key) = obtain_host_id(&mut host).await;

    let mut client = router.peer(PeerRole::Client, Some(SessionType::DesktopView)).await;
    client
        .send(&PeerToRouter::SessionRequest {
            host_id,
            session_type: SessionType::DesktopView,
        })
        .await
        .unwrap();

    let (session_id, relay_addr, relay_key) = offered(client.recv().await.unwrap());
    // The host leg receives the same offer.
    let (host_copy, _, host_key) = offered(host.recv().await.unwrap());
    assert_eq!(host_copy, session_id);
    assert_eq!(host_key, relay_key);

    let mut client_leg = attach_leg(&relay_addr, session_id, relay_key, PeerRole::Client).await;
    let mut host_leg = attach_leg(&relay_addr, session_id, relay_key, PeerRole::Host).await;

    client_leg.write_all(b"input events").await.unwrap();
    let mut buf = [0u8; 12];
    host_leg.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"input events");

    host_leg.write_all(b"frame data!!").await.unwrap();
    client_leg.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"frame data!!");

    // One leg closing tears the session down and notifies the peers.
    drop(client_leg);
    let notice = tokio::time::timeout(Duration::from_secs(5), host.recv::<RouterToPeer>())
        .await
        .expect("timed out waiting for session close")
        .unwrap();
    match notice {
        RouterToPeer::SessionClosed {
            session_id: closed, ..
        } => assert_eq!(closed, session_id),
        other => panic!("expected session closed, got {:?}", other),
    }
    assert_eq!(router.state.sessions.count(), 0);

    router.shutdown.cancel();
}

/// A host that reconnects with its persisted key gets the same id; an
/// unknown key is refused without dropping the connection.
#[tokio::test]
async fn test_host_rebinds_by_key() {
    let router = TestRouter::start(8, 5).await;

    let mut host = router.peer(PeerRole::Host, None).await;
    let (host_id, key) = obtain_host_id(&mut host).await;
    drop(host);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut host = router.peer(PeerRole::Host, None).await;
    host.send(&PeerToRouter::HostIdRequest {
        request: HostIdVariant::ExistingId { key: key.clone() },
    })
    .await
    .unwrap();
    match host.recv::<RouterToPeer>().await.unwrap() {
        RouterToPeer::HostIdResponse {
            host_id: rebound,
            key: no_key,
        } => {
            assert_eq!(rebound, host_id);
            assert!(no_key.is_none());
        }
        other => panic!("expected host id response, got {:?}", other),
    }

    // A bogus key is refused, but the host may try again.
    host.send(&PeerToRouter::HostIdRequest {
        request: HostIdVariant::ExistingId {
            key: vec![0u8; key.len()],
        },
    })
    .await
    .unwrap();
    match host.recv::<RouterToPeer>().await.unwrap() {
        RouterToPeer::Error { code } => assert_eq!(code, ErrorCode::HostNotFound),
        other => panic!("expected refusal, got {:?}", other),
    }
    host.send(&PeerToRouter::HostIdRequest {
        request: HostIdVariant::ExistingId { key },
    })
    .await
    .unwrap();
    assert!(matches!(
        host.recv::<RouterToPeer>().await.unwrap(),
        RouterToPeer::HostIdResponse { .. }
    ));

    router.shutdown.cancel();
}

/// An exhausted relay pool refuses new sessions without closing the
/// client connection.
#[tokio::test]
async fn test_no_capacity_is_recoverable() {
    let router = TestRouter::start(1, 5).await;

    let mut host = router.peer(PeerRole::Host, None).await;
    let (host_id, _key) = obtain_host_id(&mut host).await;

    let mut first = router.peer(PeerRole::Client, Some(SessionType::DesktopView)).await;
    first
        .send(&PeerToRouter::SessionRequest {
            host_id,
            session_type: SessionType::DesktopView,
        })
        .await
        .unwrap();
    offered(first.recv().await.unwrap());

    let mut second = router.peer(PeerRole::Client, Some(SessionType::DesktopView)).await;
    second
        .send(&PeerToRouter::SessionRequest {
            host_id,
            session_type: SessionType::DesktopView,
        })
        .await
        .unwrap();
    match second.recv::<RouterToPeer>().await.unwrap() {
        RouterToPeer::Error { code } => assert_eq!(code, ErrorCode::NoCapacity),
        other => panic!("expected refusal, got {:?}", other),
    }

    // The refused client can still talk to an unknown host and get the
    // matching refusal, proving the connection survived.
    second
        .send(&PeerToRouter::SessionRequest {
            host_id: host_id.wrapping_add(1),
            session_type: SessionType::DesktopView,
        })
        .await
        .unwrap();
    match second.recv::<RouterToPeer>().await.unwrap() {
        RouterToPeer::Error { code } => assert_eq!(code, ErrorCode::HostNotFound),
        other => panic!("expected refusal, got {:?}", other),
    }

    router.shutdown.cancel();
}

/// Repeated authentication failures from one source block further
/// handshakes before any work is spent on them.
#[tokio::test]
async fn test_auth_failures_throttle_source() {
    let router = TestRouter::start(8, 2).await;

    for _ in 0..2 {
        let stream = TcpStream::connect(router.addr).await.unwrap();
        let mut channel = Channel::new(stream);
        let err = connect_handshake(
            &mut channel,
            PeerRole::Client,
            "alice",
            &sha256_hex("wrong guess"),
            Some(SessionType::DesktopView),
        )
        .await
        .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::AccessDenied);
    }

    // The throttle closes the next connection before the handshake.
    let mut stream = TcpStream::connect(router.addr).await.unwrap();
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("timed out waiting for throttle close");
    match read {
        Ok(0) => {}
        Ok(n) => panic!("expected close, got {} bytes", n),
        Err(_) => {}
    }

    router.shutdown.cancel();
}

/// Graceful shutdown notifies connected peers and stops the router.
#[tokio::test]
async fn test_graceful_shutdown_notifies_peers() {
    let router = TestRouter::start(8, 5).await;

    let mut host = router.peer(PeerRole::Host, None).await;
    obtain_host_id(&mut host).await;

    router.shutdown.cancel();

    let notice = tokio::time::timeout(Duration::from_secs(5), host.recv::<RouterToPeer>())
        .await
        .expect("timed out waiting for shutdown notice");
    match notice {
        Ok(RouterToPeer::Error { code }) => assert_eq!(code, ErrorCode::ShuttingDown),
        // The connection may already be gone when shutdown wins the race.
        Ok(other) => panic!("unexpected message: {:?}", other),
        Err(_) => {}
    }

    let result = tokio::time::timeout(Duration::from_secs(5), router.handle)
        .await
        .expect("router did not stop");
    assert!(result.unwrap().is_ok());
}

/// A relay proxy registers, heartbeats, and is selected for sessions
/// once the built-in relay would be the worse choice.
#[tokio::test]
async fn test_proxy_registration_and_heartbeat() {
    let router = TestRouter::start(8, 5).await;

    let mut proxy = router.peer(PeerRole::Proxy, None).await;
    proxy
        .send(&PeerToRouter::ProxyRegister {
            relay_addr: "relay-01.example.net:8070".to_string(),
            pool_size: 64,
        })
        .await
        .unwrap();
    let proxy_id = match proxy.recv::<RouterToPeer>().await.unwrap() {
        RouterToPeer::ProxyRegistered { proxy_id } => proxy_id,
        other => panic!("expected registration ack, got {:?}", other),
    };
    assert!(proxy_id > 0);

    proxy
        .send(&PeerToRouter::ProxyHeartbeat { active_sessions: 3 })
        .await
        .unwrap();
    assert!(matches!(
        proxy.recv::<RouterToPeer>().await.unwrap(),
        RouterToPeer::HeartbeatAck
    ));

    // Built-in relay plus the external proxy.
    assert_eq!(router.state.pool.snapshot().len(), 2);

    // The proxy's registration disappears with its connection.
    drop(proxy);
    for _ in 0..50 {
        if router.state.pool.snapshot().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(router.state.pool.snapshot().len(), 1);

    router.shutdown.cancel();
}
