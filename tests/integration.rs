//! End-to-end coverage over real loopback TCP sockets — no mocked transport.
//!
//! Each test drives the public surface (`event_loop`/`connect`/`accept`/
//! `shutdown`) exactly as a user would; none of them reach into the crate's
//! internals.
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use wireq::{ClientOptions, Inbound, ServerOptions};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn recv(rx: &flume::Receiver<Inbound>) -> Inbound {
    rx.recv_timeout(RECV_TIMEOUT).expect("expected an inbound item")
}

fn recv_payload(rx: &flume::Receiver<Inbound>) -> Vec<u8> {
    match recv(rx) {
        Inbound::Payload(p) => p,
        other => panic!("expected a payload, got {other:?}"),
    }
}

/// E1 "push": A connects, B accepts, A writes three payloads and closes its
/// outbound queue; B observes them in order followed by `Closed`.
#[test]
fn e1_push() {
    let reactor = wireq::event_loop().unwrap();

    let server = reactor.accept("127.0.0.1:0".parse().unwrap(), ServerOptions::default()).unwrap();
    let a = reactor.connect(server.local_addr, ClientOptions::default());
    let b = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();

    assert_eq!(recv(&a.inbound), Inbound::Connected);
    assert_eq!(recv(&b.inbound), Inbound::Connected);

    a.outbound.send(b"abc".to_vec()).unwrap();
    a.outbound.send(b"def".to_vec()).unwrap();
    a.outbound.send(b"xyz".to_vec()).unwrap();
    drop(a.outbound);

    assert_eq!(recv_payload(&b.inbound), b"abc");
    assert_eq!(recv_payload(&b.inbound), b"def");
    assert_eq!(recv_payload(&b.inbound), b"xyz");
    assert_eq!(recv(&b.inbound), Inbound::Closed);
    assert!(b.inbound.recv_timeout(RECV_TIMEOUT).is_err());

    reactor.shutdown();
}

/// E2 "poll": as E1 but the accepted side writes to the dialing side.
#[test]
fn e2_poll() {
    let reactor = wireq::event_loop().unwrap();

    let server = reactor.accept("127.0.0.1:0".parse().unwrap(), ServerOptions::default()).unwrap();
    let a = reactor.connect(server.local_addr, ClientOptions::default());
    let b = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();

    assert_eq!(recv(&a.inbound), Inbound::Connected);
    assert_eq!(recv(&b.inbound), Inbound::Connected);

    b.outbound.send(b"abc".to_vec()).unwrap();
    b.outbound.send(b"def".to_vec()).unwrap();
    b.outbound.send(b"xyz".to_vec()).unwrap();

    assert_eq!(recv_payload(&a.inbound), b"abc");
    assert_eq!(recv_payload(&a.inbound), b"def");
    assert_eq!(recv_payload(&a.inbound), b"xyz");

    reactor.shutdown();
}

/// E3 "request/reply".
#[test]
fn e3_request_reply() {
    let reactor = wireq::event_loop().unwrap();

    let server = reactor.accept("127.0.0.1:0".parse().unwrap(), ServerOptions::default()).unwrap();
    let a = reactor.connect(server.local_addr, ClientOptions::default());
    let b = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();

    assert_eq!(recv(&a.inbound), Inbound::Connected);
    assert_eq!(recv(&b.inbound), Inbound::Connected);

    a.outbound.send(b"req".to_vec()).unwrap();
    assert_eq!(recv_payload(&b.inbound), b"req");

    b.outbound.send(b"rep".to_vec()).unwrap();
    assert_eq!(recv_payload(&a.inbound), b"rep");

    reactor.shutdown();
}

/// E4 "two clients": two independent dialers talk to one listener without
/// cross-talk, including through the listener's not-accepting gate.
#[test]
fn e4_two_clients() {
    let reactor = wireq::event_loop().unwrap();

    let server = reactor.accept("127.0.0.1:0".parse().unwrap(), ServerOptions::default()).unwrap();

    let client1 = reactor.connect(server.local_addr, ClientOptions::default());
    let server1 = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();
    let client2 = reactor.connect(server.local_addr, ClientOptions::default());
    let server2 = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();

    assert_eq!(recv(&client1.inbound), Inbound::Connected);
    assert_eq!(recv(&server1.inbound), Inbound::Connected);
    assert_eq!(recv(&client2.inbound), Inbound::Connected);
    assert_eq!(recv(&server2.inbound), Inbound::Connected);

    client1.outbound.send(b"req1".to_vec()).unwrap();
    client2.outbound.send(b"req2".to_vec()).unwrap();

    assert_eq!(recv_payload(&server1.inbound), b"req1");
    assert_eq!(recv_payload(&server2.inbound), b"req2");

    server1.outbound.send(b"rep1".to_vec()).unwrap();
    server2.outbound.send(b"rep2".to_vec()).unwrap();

    assert_eq!(recv_payload(&client1.inbound), b"rep1");
    assert_eq!(recv_payload(&client2.inbound), b"rep2");

    reactor.shutdown();
}

/// E5 "reconnect": the server's whole reactor goes away and a fresh one
/// comes up on the same address; the client observes `Disconnected` then
/// `Connected` and keeps working.
#[test]
fn e5_reconnect() {
    let client_reactor = wireq::event_loop().unwrap();
    let server_reactor = wireq::event_loop().unwrap();

    let opts = ClientOptions {
        reconnect_period: Duration::from_millis(20),
        ..Default::default()
    };

    let server = server_reactor.accept("127.0.0.1:0".parse().unwrap(), ServerOptions::default()).unwrap();
    let addr = server.local_addr;
    let client = client_reactor.connect(addr, opts);
    let accepted = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();

    assert_eq!(recv(&client.inbound), Inbound::Connected);
    assert_eq!(recv(&accepted.inbound), Inbound::Connected);

    server_reactor.shutdown();
    assert_eq!(recv(&client.inbound), Inbound::Disconnected);

    let server_reactor2 = wireq::event_loop().unwrap();
    let server2 = server_reactor2.accept(addr, ServerOptions::default()).unwrap();
    assert_eq!(recv(&client.inbound), Inbound::Connected);
    let accepted2 = server2.accept.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(recv(&accepted2.inbound), Inbound::Connected);

    client.outbound.send(b"hello again".to_vec()).unwrap();
    assert_eq!(recv_payload(&accepted2.inbound), b"hello again");

    client_reactor.shutdown();
    server_reactor2.shutdown();
}

/// E6 "close while disconnected": an endpoint that is mid-retry closes
/// cleanly as soon as its outbound queue is dropped.
#[test]
fn e6_close_while_disconnected() {
    let client_reactor = wireq::event_loop().unwrap();
    let server_reactor = wireq::event_loop().unwrap();

    let opts = ClientOptions {
        reconnect_period: Duration::from_secs(30),
        ..Default::default()
    };

    let server = server_reactor.accept("127.0.0.1:0".parse().unwrap(), ServerOptions::default()).unwrap();
    let addr = server.local_addr;
    let client = client_reactor.connect(addr, opts);
    let accepted = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();

    assert_eq!(recv(&client.inbound), Inbound::Connected);
    assert_eq!(recv(&accepted.inbound), Inbound::Connected);

    server_reactor.shutdown();
    assert_eq!(recv(&client.inbound), Inbound::Disconnected);

    drop(client.outbound);
    assert_eq!(recv(&client.inbound), Inbound::Closed);
    assert!(client.inbound.recv_timeout(RECV_TIMEOUT).is_err());

    client_reactor.shutdown();
}

/// Invariant 5 "stall detection": an accepted endpoint whose peer never
/// reads or writes anything is declared stuck and closed once
/// `heartbeat_timeout_ms` elapses, without either side tearing down the
/// socket explicitly.
#[test]
fn stall_detection_closes_accepted_endpoint() {
    let reactor = wireq::event_loop().unwrap();

    let opts = ServerOptions {
        heartbeat_period: Duration::from_secs(30),
        heartbeat_timeout: Duration::from_millis(150),
        ..Default::default()
    };
    let server = reactor.accept("127.0.0.1:0".parse().unwrap(), opts).unwrap();

    // A bare socket that never runs the framing protocol: no heartbeats, no
    // reads. Held alive so no FIN is ever sent.
    let _silent_peer = TcpStream::connect(server.local_addr).unwrap();

    let accepted = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(recv(&accepted.inbound), Inbound::Connected);
    assert_eq!(recv(&accepted.inbound), Inbound::Closed);

    reactor.shutdown();
}

/// Invariant 4 "heartbeat invisibility": two idle endpoints held open across
/// several heartbeat periods never surface a heartbeat as a payload.
#[test]
fn heartbeats_never_surface_as_payloads() {
    let reactor = wireq::event_loop().unwrap();

    let opts = ClientOptions {
        heartbeat_period: Duration::from_millis(20),
        heartbeat_timeout: Duration::from_secs(30),
        ..Default::default()
    };
    let server = reactor.accept("127.0.0.1:0".parse().unwrap(), ServerOptions::default()).unwrap();
    let client = reactor.connect(server.local_addr, opts);
    let accepted = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();

    assert_eq!(recv(&client.inbound), Inbound::Connected);
    assert_eq!(recv(&accepted.inbound), Inbound::Connected);

    std::thread::sleep(Duration::from_millis(250));

    // Several heartbeats should have crossed the wire by now; none of them
    // may appear on the peer's inbound queue.
    assert!(accepted.inbound.try_recv().is_err());

    reactor.shutdown();
}

/// Invariant 7 "idempotent bind release": shutting a reactor down frees its
/// listening port for immediate reuse by a fresh reactor.
#[test]
fn bind_release_is_idempotent() {
    let reactor1 = wireq::event_loop().unwrap();
    let server1 = reactor1.accept("127.0.0.1:0".parse().unwrap(), ServerOptions::default()).unwrap();
    let addr: SocketAddr = server1.local_addr;
    reactor1.shutdown();

    let reactor2 = wireq::event_loop().unwrap();
    let server2 = reactor2.accept(addr, ServerOptions::default()).unwrap();
    assert_eq!(server2.local_addr, addr);
    reactor2.shutdown();
}

/// Invariant 8 "shutdown completeness": every endpoint a reactor owns is
/// closed out, and its queues close, once `shutdown` returns.
#[test]
fn shutdown_closes_every_endpoint() {
    let reactor = wireq::event_loop().unwrap();

    let server = reactor.accept("127.0.0.1:0".parse().unwrap(), ServerOptions::default()).unwrap();
    let client = reactor.connect(server.local_addr, ClientOptions::default());
    let accepted = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();

    assert_eq!(recv(&client.inbound), Inbound::Connected);
    assert_eq!(recv(&accepted.inbound), Inbound::Connected);

    reactor.shutdown();

    assert_eq!(recv(&client.inbound), Inbound::Closed);
    assert_eq!(recv(&accepted.inbound), Inbound::Closed);
    assert!(client.inbound.recv_timeout(RECV_TIMEOUT).is_err());
    assert!(accepted.inbound.recv_timeout(RECV_TIMEOUT).is_err());
}

/// Invariant 1/2 "framing round-trip and order preservation" for a larger,
/// varied batch than the literal E-scenarios exercise.
#[test]
fn framing_preserves_order_and_content() {
    let reactor = wireq::event_loop().unwrap();

    let server = reactor.accept("127.0.0.1:0".parse().unwrap(), ServerOptions::default()).unwrap();
    let client = reactor.connect(server.local_addr, ClientOptions::default());
    let accepted = server.accept.recv_timeout(RECV_TIMEOUT).unwrap();

    assert_eq!(recv(&client.inbound), Inbound::Connected);
    assert_eq!(recv(&accepted.inbound), Inbound::Connected);

    let payloads: Vec<Vec<u8>> = (0..50).map(|i| vec![i as u8; 1 + i]).collect();
    for p in &payloads {
        client.outbound.send(p.clone()).unwrap();
    }

    for expected in &payloads {
        assert_eq!(&recv_payload(&accepted.inbound), expected);
    }

    reactor.shutdown();
}
