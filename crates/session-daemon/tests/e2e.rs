//! End-to-end tests for session-daemon.
//!
//! Runs several nodes in one process, each on its own loopback address and
//! all on a shared port, and exercises replication, failure handling, expiry
//! and discovery over real UDP sockets. Linux routes all of 127.0.0.0/8 to
//! loopback, which gives every node a distinct identity.

#![cfg(target_os = "linux")]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use session_core::protocol::MAX_DATAGRAM_LEN;
use session_core::view::parse_address_list;
use session_core::{Frame, InMemoryDirectory, MembershipView, NULL_ADDR, Opcode, RpcClient};
use session_daemon::{Config, Node, NodeHandle, UdpTransport};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const NO_CANDIDATES: &[&str] = &[];
const RPC_TIMEOUT: Duration = Duration::from_millis(300);

/// Each test uses its own 127.0.<subnet>.0/24 so parallel tests never collide.
fn addr(subnet: u8, host: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, subnet, host))
}

fn free_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn test_config(ip: IpAddr, port: u16) -> Config {
    Config {
        rpc_port: port,
        bind_ip: ip,
        advertise_ip: Some(ip),
        rpc_timeout_ms: RPC_TIMEOUT.as_millis() as u64,
        // Keep background gossip out of the way unless a test wants it
        view_refresh_ms: 60_000,
        ..Config::default()
    }
}

async fn start_node(ip: IpAddr, port: u16) -> NodeHandle {
    Node::start(&test_config(ip, port), Arc::new(InMemoryDirectory::new()))
        .await
        .expect("Failed to start node")
}

/// A bound socket that never answers: requests to it simply time out.
async fn black_hole(ip: IpAddr, port: u16) -> UdpSocket {
    UdpSocket::bind((ip, port)).await.expect("Failed to bind black hole")
}

fn strings(ips: &[IpAddr]) -> Vec<String> {
    ips.iter().map(IpAddr::to_string).collect()
}

/// Poll `check` until it holds or `within` elapses.
async fn eventually(within: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Send one raw datagram to `target` and wait briefly for the answer frame.
async fn raw_request(socket: &UdpSocket, target: (IpAddr, u16), datagram: &[u8]) -> Option<Frame> {
    socket.send_to(datagram, target).await.unwrap();
    let mut buf = [0u8; MAX_DATAGRAM_LEN];
    match timeout(RPC_TIMEOUT, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(Frame::decode(&buf[..len]).unwrap()),
        _ => None,
    }
}

// ============================================================================
// Replication
// ============================================================================

#[tokio::test]
async fn test_write_then_remote_read() {
    let port = free_port();
    let a = start_node(addr(1, 1), port).await;
    let b = start_node(addr(1, 2), port).await;
    let c = start_node(addr(1, 3), port).await;
    a.view().add_peer(b.local_ip());

    let record = a.service().new_session("Hello");
    let (local, custodian) = a.service().write_session(&record, NO_CANDIDATES).await;
    assert_eq!(local, a.local_ip());
    assert_eq!(custodian, b.local_ip());

    // The custodian holds a replica at the same version
    let replica = b.store().get_session(&record.id(), Some(1)).unwrap();
    assert_eq!(replica.message(), "Hello");
    // The custodian learned the writer from the request itself
    assert!(b.view().contains(&a.local_ip()));

    // A third instance fetches it over RPC
    let handle = strings(&[local, custodian]);
    let fetched = c.service().read_session(&record.id(), 1, &handle).await.unwrap();
    assert_eq!(fetched.message(), "Hello");
    assert_eq!(fetched.version(), 1);

    // Remote reads never remove
    assert!(a.store().get_session(&record.id(), Some(1)).is_some());
    assert!(b.store().get_session(&record.id(), Some(1)).is_some());

    for node in [a, b, c] {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn test_local_read_is_destructive() {
    let port = free_port();
    let a = start_node(addr(2, 1), port).await;

    let record = a.service().new_session("Hello");
    let (local, custodian) = a.service().write_session(&record, NO_CANDIDATES).await;
    assert_eq!(custodian, NULL_ADDR, "no peers means no custodian");

    let handle = strings(&[local, custodian]);
    let read = a.service().read_session(&record.id(), 1, &handle).await.unwrap();
    assert_eq!(read.message(), "Hello");

    // Taken out until the caller writes it back
    assert!(a.service().read_session(&record.id(), 1, &handle).await.is_none());

    a.shutdown().await;
}

#[tokio::test]
async fn test_stale_version_is_not_served() {
    let port = free_port();
    let a = start_node(addr(3, 1), port).await;
    let b = start_node(addr(3, 2), port).await;
    let c = start_node(addr(3, 3), port).await;
    a.view().add_peer(b.local_ip());

    let mut record = a.service().new_session("first");
    let (local, custodian) = a.service().write_session(&record, NO_CANDIDATES).await;
    let handle = strings(&[local, custodian]);

    record.increment_version();
    record.set_message("second");
    let (local, custodian) = a.service().write_session(&record, &handle).await;
    assert_eq!(custodian, b.local_ip());
    let handle = strings(&[local, custodian]);

    // Both replicas moved on, so the old version is gone everywhere
    assert!(c.service().read_session(&record.id(), 1, &handle).await.is_none());

    let fetched = c.service().read_session(&record.id(), 2, &handle).await.unwrap();
    assert_eq!(fetched.message(), "second");

    for node in [a, b, c] {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn test_write_skips_dead_custodian() {
    let port = free_port();
    let dead = addr(9, 5);
    let _hole = black_hole(dead, port).await;
    let a = start_node(addr(9, 1), port).await;
    let b = start_node(addr(9, 2), port).await;
    a.view().add_peer(b.local_ip());

    let record = a.service().new_session("Hello");
    let old_handle = strings(&[a.local_ip(), dead]);
    let started = Instant::now();
    let (_, custodian) = a.service().write_session(&record, &old_handle).await;

    assert_eq!(custodian, b.local_ip());
    assert!(started.elapsed() >= RPC_TIMEOUT, "the dead replica is tried first");
    assert!(!a.view().contains(&dead));
    assert!(b.store().get_session(&record.id(), Some(1)).is_some());

    a.shutdown().await;
    b.shutdown().await;
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test]
async fn test_silent_peers_are_skipped_in_order() {
    let port = free_port();
    let silent = [addr(4, 1), addr(4, 2)];
    let _holes = [black_hole(silent[0], port).await, black_hole(silent[1], port).await];
    let b = start_node(addr(4, 3), port).await;

    let caller_ip = addr(4, 9);
    let view = Arc::new(MembershipView::new(caller_ip));
    for ip in [silent[0], silent[1], b.local_ip()] {
        view.add_peer(ip);
    }
    let transport = UdpTransport::new(caller_ip, port, RPC_TIMEOUT, Arc::clone(&view));

    let started = Instant::now();
    let reply = transport
        .send_request(
            Opcode::GetView,
            caller_ip.to_string().as_bytes(),
            &[silent[0], silent[1], b.local_ip()],
        )
        .await
        .expect("the live peer should answer");

    assert!(started.elapsed() >= RPC_TIMEOUT * 2);
    assert!(!view.contains(&silent[0]));
    assert!(!view.contains(&silent[1]));
    assert!(view.contains(&b.local_ip()));

    let peers = parse_address_list(&String::from_utf8(reply).unwrap());
    assert!(peers.contains(&caller_ip));
    assert!(b.view().contains(&caller_ip));

    b.shutdown().await;
}

#[tokio::test]
async fn test_get_view_from_fresh_peer() {
    let port = free_port();
    let b = start_node(addr(5, 1), port).await;

    let caller_ip = addr(5, 9);
    let view = Arc::new(MembershipView::new(caller_ip));
    let transport = UdpTransport::new(caller_ip, port, RPC_TIMEOUT, view);

    let reply = transport
        .send_request(Opcode::GetView, b"", &[b.local_ip()])
        .await
        .unwrap();
    let text = String::from_utf8(reply).unwrap();
    assert!(!text.is_empty());
    for entry in text.split('_') {
        assert!(entry.parse::<IpAddr>().is_ok(), "bad entry {:?}", entry);
    }
    // The listener records whoever reaches it
    assert!(parse_address_list(&text).contains(&caller_ip));

    b.shutdown().await;
}

#[tokio::test]
async fn test_listener_survives_bad_requests() {
    let port = free_port();
    let a = start_node(addr(6, 1), port).await;
    let target = (a.local_ip(), port);
    let socket = UdpSocket::bind((addr(6, 9), 0)).await.unwrap();

    // Shorter than a header: dropped without an answer
    assert!(raw_request(&socket, target, &[1, 2, 3]).await.is_none());

    // Unknown opcode
    let unknown = Frame {
        call_id: 42,
        opcode: 99,
        payload: b"x".to_vec(),
    };
    let answer = raw_request(&socket, target, &unknown.encode()).await.unwrap();
    assert_eq!(answer.call_id, 42);
    assert_eq!(answer.op(), Some(Opcode::NoReply));

    // Malformed read
    let bad_read = Frame::new(43, Opcode::SessionRead, "nonsense");
    let answer = raw_request(&socket, target, &bad_read.encode()).await.unwrap();
    assert_eq!(answer.call_id, 43);
    assert_eq!(answer.op(), Some(Opcode::NoReply));

    // Still serving
    let view = Frame::new(44, Opcode::GetView, "");
    let answer = raw_request(&socket, target, &view.encode()).await.unwrap();
    assert_eq!(answer.op(), Some(Opcode::Reply));

    a.shutdown().await;
}

// ============================================================================
// Background loops
// ============================================================================

#[tokio::test]
async fn test_expired_sessions_are_collected() {
    let port = free_port();
    let ip = addr(7, 1);
    let config = Config {
        session_ttl_ms: 100,
        gc_interval_ms: 50,
        ..test_config(ip, port)
    };
    let a = Node::start(&config, Arc::new(InMemoryDirectory::new()))
        .await
        .unwrap();

    let record = a.service().new_session("short-lived");
    let (local, custodian) = a.service().write_session(&record, NO_CANDIDATES).await;
    assert_eq!(a.store().len(), 1);

    let store = Arc::clone(a.store());
    assert!(eventually(Duration::from_secs(2), || store.is_empty()).await);

    let handle = strings(&[local, custodian]);
    assert!(a.service().read_session(&record.id(), 1, &handle).await.is_none());

    a.shutdown().await;
}

#[tokio::test]
async fn test_nodes_discover_each_other_through_directory() {
    let port = free_port();
    let directory = Arc::new(InMemoryDirectory::new());
    let mut nodes = Vec::new();
    for host in 1..=3 {
        let config = Config {
            view_refresh_ms: 50,
            ..test_config(addr(8, host), port)
        };
        nodes.push(Node::start(&config, directory.clone()).await.unwrap());
    }

    let ips: Vec<IpAddr> = nodes.iter().map(NodeHandle::local_ip).collect();
    let views: Vec<Arc<MembershipView>> = nodes.iter().map(|n| Arc::clone(n.view())).collect();
    let converged = eventually(Duration::from_secs(5), || {
        views.iter().all(|view| {
            ips.iter()
                .filter(|ip| **ip != view.local_ip())
                .all(|ip| view.contains(ip))
        })
    })
    .await;
    assert!(converged, "views never converged");

    for node in nodes {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn test_shutdown_releases_port() {
    let port = free_port();
    let ip = addr(10, 1);

    let first = start_node(ip, port).await;
    assert_eq!(first.listen_addr().port(), port);
    first.shutdown().await;

    let second = start_node(ip, port).await;
    second.shutdown().await;
}
