//! Integration tests for session setup and teardown.
//!
//! Each test binds real connections on loopback: a server-role endpoint on
//! an OS-chosen port and an initiator pointed at it.

use std::net::SocketAddr;
use std::time::Duration;

use cozmo_link::{
    message::Ping, ConnError, Connection, ConnectionConfig, ConnectionState, HandlerKey, Packet,
    PacketType, Role,
};

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Start a server on loopback and an initiator aimed at it (not yet connected).
async fn start_pair() -> (Connection, Connection) {
    let server = Connection::bind(ConnectionConfig::server(loopback()))
        .await
        .expect("bind server");
    server.start().expect("start server");

    let config = ConnectionConfig::initiator(server.local_addr()).with_bind_addr(loopback());
    let client = Connection::bind(config).await.expect("bind client");
    client.start().expect("start client");
    (server, client)
}

async fn connected_pair() -> (Connection, Connection) {
    let (server, client) = start_pair().await;
    client.connect().expect("connect");
    client
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .expect("client never connected");
    server
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .expect("server never connected");
    (server, client)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_both_sides_reach_connected() {
    let (server, client) = connected_pair().await;

    assert_eq!(client.role(), Role::Initiator);
    assert_eq!(server.role(), Role::Server);
    assert_eq!(server.peer_addr(), Some(client.local_addr()));
    assert_eq!(client.peer_addr(), Some(server.local_addr()));

    client.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn connect_is_reported_to_handlers() {
    let (server, client) = start_pair().await;
    let server_saw = server.dispatcher().once(HandlerKey::Packet(PacketType::Connect)).1;
    let client_saw = client.dispatcher().once(HandlerKey::Packet(PacketType::Connect)).1;

    client.connect().unwrap();
    tokio::time::timeout(WAIT, server_saw).await.unwrap().unwrap();
    let greeting = tokio::time::timeout(WAIT, client_saw).await.unwrap().unwrap();
    // First sequenced packet after a reset.
    assert_eq!(greeting.seq(), 1);
}

#[tokio::test]
async fn server_disconnect_drives_initiator_idle() {
    let (server, client) = connected_pair().await;

    server.disconnect().unwrap();
    assert_eq!(server.state(), ConnectionState::Idle);
    client
        .wait_for_state(ConnectionState::Idle, WAIT)
        .await
        .expect("FIN never reached the initiator");
}

#[tokio::test]
async fn initiator_disconnect_drives_server_idle() {
    let (server, client) = connected_pair().await;

    client.disconnect().unwrap();
    assert_eq!(client.state(), ConnectionState::Idle);
    server
        .wait_for_state(ConnectionState::Idle, WAIT)
        .await
        .expect("DISCONNECT never reached the server");
}

#[tokio::test]
async fn reconnect_after_disconnect() {
    let (server, client) = connected_pair().await;
    client.disconnect().unwrap();
    server.wait_for_state(ConnectionState::Idle, WAIT).await.unwrap();

    client.connect().unwrap();
    client.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    server.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
}

#[tokio::test]
async fn keepalive_pings_flow_while_connected() {
    let (server, client) = connected_pair().await;
    // Default ping interval is one second.
    let ping: Ping = server
        .wait_for_message(Duration::from_secs(3))
        .await
        .expect("no keep-alive");
    assert!(ping.counter >= 1);
    assert!(client.stats().frames_sent > 0);
}

#[tokio::test]
async fn wait_for_times_out() {
    let (_server, client) = start_pair().await;
    let key = HandlerKey::Message(PacketType::Event, 0x42);
    let err = client
        .wait_for(key, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnError::Timeout));
    assert_eq!(client.dispatcher().handler_count(key), 0);
}

#[tokio::test]
async fn connect_rejected_for_server_and_when_busy() {
    let (server, client) = start_pair().await;
    assert!(matches!(
        server.connect(),
        Err(ConnError::WrongRole {
            expected: Role::Initiator
        })
    ));

    // Nobody answers a RESET sent to an unused port.
    let lonely = Connection::bind(
        ConnectionConfig::initiator("127.0.0.1:9".parse().unwrap()).with_bind_addr(loopback()),
    )
    .await
    .unwrap();
    lonely.start().unwrap();
    lonely.connect().unwrap();
    assert_eq!(lonely.state(), ConnectionState::Connecting);
    assert!(matches!(
        lonely.connect(),
        Err(ConnError::InvalidState(ConnectionState::Connecting))
    ));
    assert!(matches!(
        lonely
            .wait_for_state(ConnectionState::Connected, Duration::from_millis(200))
            .await,
        Err(ConnError::Timeout)
    ));

    drop(client);
}

#[tokio::test]
async fn lifecycle_errors() {
    let conn = Connection::bind(ConnectionConfig::server(loopback()))
        .await
        .unwrap();
    conn.start().unwrap();
    assert!(matches!(conn.start(), Err(ConnError::AlreadyStarted)));
    conn.stop().await.unwrap();
    assert!(matches!(conn.stop().await, Err(ConnError::Stopped)));
    assert!(matches!(conn.start(), Err(ConnError::Stopped)));
}

#[tokio::test]
async fn bad_window_rejected_at_bind() {
    let config = ConnectionConfig::server(loopback()).with_window(3, 16);
    assert!(matches!(
        Connection::bind(config).await,
        Err(ConnError::Window(_))
    ));
}

#[tokio::test]
async fn narrow_sequence_space_rejected_at_bind() {
    let config = ConnectionConfig::server(loopback()).with_window(4, 3);
    assert!(matches!(
        Connection::bind(config).await,
        Err(ConnError::SeqBits(3))
    ));
}

#[tokio::test]
async fn wait_for_state_when_already_there() {
    let (server, _client) = start_pair().await;
    server
        .wait_for_state(ConnectionState::Idle, Duration::from_millis(100))
        .await
        .expect("already idle");
}

#[tokio::test]
async fn stop_wakes_pending_wait_for() {
    let (server, _client) = start_pair().await;
    let key = HandlerKey::Message(PacketType::Event, 0x42);

    let (waited, stopped) = tokio::join!(server.wait_for(key, WAIT), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.stop().await
    });
    stopped.unwrap();
    assert!(matches!(waited, Err(ConnError::Stopped)));
    assert!(matches!(
        server.wait_for(key, WAIT).await,
        Err(ConnError::Stopped)
    ));
}

#[tokio::test]
async fn child_dispatcher_cycle_is_refused() {
    let (server, _client) = start_pair().await;
    let app = cozmo_link::Dispatcher::new();
    server.add_child_dispatcher(&app).unwrap();
    assert!(matches!(
        app.add_child(&server.dispatcher()),
        Err(cozmo_link::dispatch::DispatchError::Cycle)
    ));
    assert!(matches!(
        server.add_child_dispatcher(&server.dispatcher()),
        Err(ConnError::Dispatch(_))
    ));
}

#[tokio::test]
async fn foreign_datagrams_are_counted_and_ignored() {
    let (server, client) = connected_pair().await;

    let stranger = tokio::net::UdpSocket::bind(loopback()).await.unwrap();
    let frame = cozmo_link::Frame::batch(
        cozmo_link::FrameType::Robot,
        0,
        vec![Packet::empty(PacketType::Event)],
    );
    stranger
        .send_to(&frame.to_bytes(), client.local_addr())
        .await
        .unwrap();
    stranger.send_to(b"junk", server.local_addr()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.stats().foreign_datagrams, 1);
    assert_eq!(server.stats().frames_dropped, 1);
    assert_eq!(client.state(), ConnectionState::Connected);
}
