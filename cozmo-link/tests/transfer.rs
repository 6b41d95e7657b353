//! Integration tests for sequenced delivery between two connections.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use cozmo_link::codec::{CodecError, Reader, Writer};
use cozmo_link::{
    ConnError, Connection, ConnectionConfig, ConnectionState, Dispatcher, HandlerKey, Message,
    Packet, PacketType,
};

const WAIT: Duration = Duration::from_secs(5);

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn connected_pair() -> (Connection, Connection) {
    let server = Connection::bind(ConnectionConfig::server(loopback()))
        .await
        .unwrap();
    server.start().unwrap();
    let client = Connection::bind(
        ConnectionConfig::initiator(server.local_addr()).with_bind_addr(loopback()),
    )
    .await
    .unwrap();
    client.start().unwrap();
    client.connect().unwrap();
    client.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    server.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    (server, client)
}

/// ACTION packet `[id, n_lo, n_hi]`.
fn numbered(id: u8, n: u16) -> Packet {
    let [lo, hi] = n.to_le_bytes();
    Packet::new(PacketType::Action, vec![id, lo, hi]).unwrap()
}

fn number_of(pkt: &Packet) -> u16 {
    u16::from_le_bytes([pkt.payload()[1], pkt.payload()[2]])
}

/// Forward every ACTION payload number seen on `conn` into a channel.
fn collect_actions(conn: &Connection) -> mpsc::UnboundedReceiver<u16> {
    let (tx, rx) = mpsc::unbounded_channel();
    conn.add_handler(
        HandlerKey::Packet(PacketType::Action),
        move |pkt| {
            let _ = tx.send(number_of(pkt));
        },
        false,
    );
    rx
}

async fn recv_n(rx: &mut mpsc::UnboundedReceiver<u16>, n: usize) -> Vec<u16> {
    let mut got = Vec::with_capacity(n);
    while got.len() < n {
        match tokio::time::timeout(WAIT, rx.recv()).await {
            Ok(Some(v)) => got.push(v),
            _ => break,
        }
    }
    got
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn thirty_packets_arrive_in_order() {
    let (server, client) = connected_pair().await;
    let mut rx = collect_actions(&server);

    for n in 1..=30 {
        client.send(numbered(0x10, n)).unwrap();
    }

    let got = recv_n(&mut rx, 30).await;
    assert_eq!(got, (1..=30).collect::<Vec<u16>>());

    // Nothing extra turns up afterwards.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn both_directions_at_once() {
    let (server, client) = connected_pair().await;
    let mut at_server = collect_actions(&server);
    let mut at_client = collect_actions(&client);

    for n in 0..100 {
        client.send_wait(numbered(1, n)).await.unwrap();
        server.send_wait(numbered(2, n + 1000)).await.unwrap();
    }

    assert_eq!(recv_n(&mut at_server, 100).await, (0..100).collect::<Vec<u16>>());
    assert_eq!(recv_n(&mut at_client, 100).await, (1000..1100).collect::<Vec<u16>>());
}

#[tokio::test]
async fn large_burst_is_split_across_frames() {
    let (server, client) = connected_pair().await;
    let mut rx = collect_actions(&server);
    let before = client.stats().frames_sent;

    // 200 × 103-byte packets cannot fit one 1024-byte frame.
    for n in 0..200 {
        let mut payload = vec![0u8; 100];
        payload[..3].copy_from_slice(&[9, (n & 0xff) as u8, (n >> 8) as u8]);
        client
            .send_wait(Packet::new(PacketType::Action, payload).unwrap())
            .await
            .unwrap();
    }

    assert_eq!(recv_n(&mut rx, 200).await, (0..200).collect::<Vec<u16>>());
    assert!(client.stats().frames_sent - before >= 20);
}

#[tokio::test]
async fn full_queue_reports_window_full() {
    // Queue depth 1 and a peer that never answers.
    let config = ConnectionConfig::initiator("127.0.0.1:9".parse().unwrap())
        .with_bind_addr(loopback())
        .with_window(2, 16)
        .with_queue_depth(1);
    let conn = Connection::bind(config).await.unwrap();
    conn.start().unwrap();

    let mut saw_full = false;
    for n in 0..10 {
        match conn.send(numbered(1, n)) {
            Ok(()) => {}
            Err(ConnError::WindowFull) => {
                saw_full = true;
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    assert!(saw_full);
    conn.stop().await.unwrap();
}

#[tokio::test]
async fn event_packets_bypass_the_window() {
    let (server, client) = connected_pair().await;
    let got = server.dispatcher().once(HandlerKey::Message(PacketType::Event, 0x33)).1;

    client
        .send(Packet::new(PacketType::Event, vec![0x33, 1]).unwrap())
        .unwrap();
    let pkt = tokio::time::timeout(WAIT, got).await.unwrap().unwrap();
    assert!(pkt.is_oob());
    assert_eq!(pkt.seq(), 0);
}

/// Application record used by the typed-message tests.
#[derive(Debug, Clone, PartialEq)]
struct SetWheels {
    left: f32,
    right: f32,
}

impl Message for SetWheels {
    const PACKET_TYPE: PacketType = PacketType::Action;
    const ID: Option<u8> = Some(0x32);

    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.write(self.left);
        w.write(self.right);
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            left: r.read()?,
            right: r.read()?,
        })
    }

    fn encoded_len(&self) -> usize {
        8
    }
}

#[tokio::test]
async fn typed_messages_reach_child_dispatcher() {
    let (server, client) = connected_pair().await;

    let app = Dispatcher::new();
    server.add_child_dispatcher(&app).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    app.add_handler(
        HandlerKey::of::<SetWheels>(),
        move |pkt| {
            if let Ok(m) = SetWheels::from_packet(pkt) {
                sink.lock().unwrap().push(m);
            }
        },
        false,
    );

    let cmd = SetWheels {
        left: 50.0,
        right: -50.0,
    };
    let (_, arrived) = server.dispatcher().once(HandlerKey::of::<SetWheels>());
    client.send_message(&cmd).unwrap();
    let pkt = tokio::time::timeout(WAIT, arrived).await.unwrap().unwrap();
    assert_eq!(pkt.message_id(), Some(0x32));
    assert_eq!(SetWheels::from_packet(&pkt).unwrap(), cmd);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*seen.lock().unwrap(), vec![cmd]);
}

#[tokio::test]
async fn echo_through_packet_sender() {
    let (server, client) = connected_pair().await;
    let echo = server.sender();
    server.add_handler(
        HandlerKey::Packet(PacketType::Action),
        move |pkt| {
            let _ = echo.send(pkt.clone());
        },
        false,
    );
    let mut back = collect_actions(&client);

    for n in 0..10 {
        client.send(numbered(5, n)).unwrap();
    }
    assert_eq!(recv_n(&mut back, 10).await, (0..10).collect::<Vec<u16>>());
}
