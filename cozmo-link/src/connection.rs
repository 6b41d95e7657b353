//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns one socket and the three tasks that drive it:
//!
//! ```text
//!                      ┌──────────────┐   frames   ┌────────┐
//!   send()/ping ──────▶│ send worker  │───────────▶│        │
//!     mpsc + control   └──────────────┘            │        │
//!                         ▲ peer ack (watch)       │  UDP   │
//!                         │ ack_due / local ack    │ socket │
//!                      ┌──────────────┐   frames   │        │
//!   handlers ◀─────────│ receive      │◀───────────│        │
//!      ▲               │ worker       │            └────────┘
//!      │ dispatch      └──────────────┘
//!   ┌──────────────┐        │ deliveries (mpsc)
//!   │ coordinator  │◀───────┘
//!   └──────────────┘
//! ```
//!
//! - The send worker is the only writer of the send window.
//! - The receive worker is the only writer of the receive window.
//! - The coordinator owns the session state transitions, runs the
//!   keep-alive and statistics timers, and is the only task that invokes
//!   application handlers.
//!
//! Nothing here blocks without a bound, so [`Connection::stop`] only has to
//! raise a flag and join the tasks.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ConnectionConfig;
use crate::dispatch::{DispatchError, Dispatcher, HandlerId, HandlerKey};
use crate::frame::Frame;
use crate::message::{Message, Ping};
use crate::packet::{Packet, PacketError, PacketType};
use crate::receiver::ReceiveWorker;
use crate::sender::{Control, SendWorker};
use crate::socket::{Socket, SocketError};
use crate::state::{ConnectionState, Role};
use crate::stats::{Stats, StatsSnapshot};
use crate::timer::{Periodic, Timing};
use crate::window::{ReceiveWindow, SendWindow, WindowError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the public connection API.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("invalid window configuration: {0}")]
    Window(#[from] WindowError),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Batch frames stamp consecutive 16-bit sequence numbers.
    #[error("a connection needs 16-bit sequence numbers, got {0} bits")]
    SeqBits(u32),
    /// The outbound queue is at capacity; retry or use `send_wait`.
    #[error("send queue is full")]
    WindowFull,
    #[error("timed out")]
    Timeout,
    #[error("operation requires the {expected} role")]
    WrongRole { expected: Role },
    #[error("operation not allowed while {0}")]
    InvalidState(ConnectionState),
    #[error("an initiator needs a peer address")]
    NoPeer,
    #[error("connection already started")]
    AlreadyStarted,
    #[error("connection is stopped")]
    Stopped,
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// State shared by the three tasks of one connection.
#[derive(Clone)]
pub(crate) struct Link {
    pub(crate) socket: Arc<Socket>,
    pub(crate) role: Role,
    pub(crate) timing: Timing,
    /// Where frames go; fixed for initiators, set by RESET for servers.
    pub(crate) peer: Arc<watch::Sender<Option<SocketAddr>>>,
    /// Cumulative ack we owe the peer, written by the receive worker.
    pub(crate) local_ack: Arc<AtomicU16>,
    /// Sequenced data arrived since our ack last went out.
    pub(crate) ack_due: Arc<AtomicBool>,
    /// Receive window must restart before the next frame is processed.
    pub(crate) recv_reset: Arc<AtomicBool>,
    pub(crate) stats: Arc<Stats>,
    pub(crate) stop: Arc<AtomicBool>,
}

/// Cheap, cloneable handle for queueing packets on a connection.
///
/// Handlers use this to reply without holding the [`Connection`] itself.
#[derive(Debug, Clone)]
pub struct PacketSender {
    outbound: mpsc::Sender<Packet>,
    control: mpsc::UnboundedSender<Control>,
}

impl PacketSender {
    /// Queue `packet` without waiting.
    ///
    /// Out-of-band packets always go straight to the send worker.  Sequenced
    /// packets fail with [`ConnError::WindowFull`] while the queue is at
    /// capacity.
    pub fn send(&self, packet: Packet) -> Result<(), ConnError> {
        if packet.is_oob() {
            return self.control(Control::Oob(packet));
        }
        self.outbound.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => ConnError::WindowFull,
            TrySendError::Closed(_) => ConnError::Stopped,
        })
    }

    /// Queue `packet`, waiting for space if necessary.
    pub async fn send_wait(&self, packet: Packet) -> Result<(), ConnError> {
        if packet.is_oob() {
            return self.control(Control::Oob(packet));
        }
        self.outbound
            .send(packet)
            .await
            .map_err(|_| ConnError::Stopped)
    }

    /// Encode and queue a typed record.
    pub fn send_message<M: Message>(&self, msg: &M) -> Result<(), ConnError> {
        self.send(msg.to_packet()?)
    }

    fn control(&self, ctrl: Control) -> Result<(), ConnError> {
        self.control.send(ctrl).map_err(|_| ConnError::Stopped)
    }
}

fn transition(state: &watch::Sender<ConnectionState>, to: ConnectionState) {
    let from = state.send_replace(to);
    if from != to {
        log::info!("[conn] {from} → {to}");
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct Tasks {
    send: SendWorker,
    recv: ReceiveWorker,
    coord: Coordinator,
}

enum Lifecycle {
    Ready(Box<Tasks>),
    Running(Vec<JoinHandle<()>>),
    Stopped,
}

/// A reliable packet link to one peer.
pub struct Connection {
    link: Link,
    sender: PacketSender,
    dispatcher: Dispatcher,
    state: Arc<watch::Sender<ConnectionState>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Connection {
    /// Bind the socket and build (but do not start) the worker tasks.
    pub async fn bind(config: ConnectionConfig) -> Result<Self, ConnError> {
        if config.seq_bits != 16 {
            return Err(ConnError::SeqBits(config.seq_bits));
        }
        let send_window =
            SendWindow::with_start(config.window_size, config.seq_bits, config.initial_seq)?;
        let recv_window =
            ReceiveWindow::with_start(config.window_size, config.seq_bits, config.initial_seq)?;
        let peer = match config.role {
            Role::Initiator => Some(config.peer_addr.ok_or(ConnError::NoPeer)?),
            Role::Server => None,
        };
        let socket = Arc::new(Socket::bind(config.bind_addr).await?);

        let idle_ack = recv_window.last_delivered();
        let (peer_tx, _) = watch::channel(peer);
        let (peer_ack_tx, peer_ack_rx) = watch::channel(idle_ack);
        let (out_tx, out_rx) = mpsc::channel(config.queue_depth.max(1));
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (del_tx, del_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let state = Arc::new(state_tx);

        let link = Link {
            socket,
            role: config.role,
            timing: config.timing,
            peer: Arc::new(peer_tx),
            local_ack: Arc::new(AtomicU16::new(idle_ack)),
            ack_due: Arc::new(AtomicBool::new(false)),
            recv_reset: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Stats::new()),
            stop: Arc::new(AtomicBool::new(false)),
        };
        let sender = PacketSender {
            outbound: out_tx,
            control: ctl_tx.clone(),
        };
        let dispatcher = Dispatcher::new();

        let tasks = Tasks {
            send: SendWorker::new(
                link.clone(),
                send_window,
                out_rx,
                ctl_rx,
                peer_ack_rx,
                config.max_frame_payload,
            ),
            recv: ReceiveWorker::new(link.clone(), recv_window, del_tx, ctl_tx, peer_ack_tx),
            coord: Coordinator::new(
                link.clone(),
                del_rx,
                dispatcher.clone(),
                Arc::clone(&state),
                sender.clone(),
            ),
        };

        log::info!(
            "[conn] bound {} as {} (window {} over {} bits)",
            link.socket.local_addr,
            link.role,
            config.window_size,
            config.seq_bits
        );
        Ok(Self {
            link,
            sender,
            dispatcher,
            state,
            lifecycle: Mutex::new(Lifecycle::Ready(Box::new(tasks))),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the send, receive and coordinator tasks.
    pub fn start(&self) -> Result<(), ConnError> {
        let mut lifecycle = self.lifecycle();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Ready(tasks) => {
                let Tasks { send, recv, coord } = *tasks;
                *lifecycle = Lifecycle::Running(vec![
                    tokio::spawn(send.run()),
                    tokio::spawn(recv.run()),
                    tokio::spawn(coord.run()),
                ]);
                Ok(())
            }
            running @ Lifecycle::Running(_) => {
                *lifecycle = running;
                Err(ConnError::AlreadyStarted)
            }
            Lifecycle::Stopped => Err(ConnError::Stopped),
        }
    }

    /// Raise the stop flag and wait for every task to finish.
    ///
    /// Queued and unacknowledged packets are abandoned.
    pub async fn stop(&self) -> Result<(), ConnError> {
        let handles = match std::mem::replace(&mut *self.lifecycle(), Lifecycle::Stopped) {
            Lifecycle::Running(handles) => handles,
            Lifecycle::Ready(_) => Vec::new(),
            Lifecycle::Stopped => return Err(ConnError::Stopped),
        };
        self.link.stop.store(true, Ordering::Release);
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("[conn] worker task failed: {e}");
            }
        }
        self.dispatcher.clear_handlers();
        transition(&self.state, ConnectionState::Idle);
        log::info!("[conn] stopped; {}", self.link.stats.snapshot());
        Ok(())
    }

    /// Open a session: restart both windows and send RESET.
    ///
    /// Initiator role only, from IDLE.  Completion is signalled by the state
    /// reaching CONNECTED; see [`Connection::wait_for_state`].
    pub fn connect(&self) -> Result<(), ConnError> {
        if self.link.role != Role::Initiator {
            return Err(ConnError::WrongRole {
                expected: Role::Initiator,
            });
        }
        let state = self.state();
        if state != ConnectionState::Idle {
            return Err(ConnError::InvalidState(state));
        }
        transition(&self.state, ConnectionState::Connecting);
        self.link.recv_reset.store(true, Ordering::Release);
        self.sender.control(Control::Reset { greeting: None })?;
        self.sender.control(Control::Raw(Frame::reset()))
    }

    /// End the session locally without waiting for the peer.
    ///
    /// An initiator sends DISCONNECT; a server sends FIN and restarts its
    /// windows.
    pub fn disconnect(&self) -> Result<(), ConnError> {
        let sent = match self.link.role {
            Role::Initiator => self.sender.send(Packet::empty(PacketType::Disconnect)),
            Role::Server => {
                self.link.recv_reset.store(true, Ordering::Release);
                self.sender
                    .control(Control::Fin)
                    .and_then(|()| self.sender.control(Control::Reset { greeting: None }))
            }
        };
        transition(&self.state, ConnectionState::Idle);
        sent
    }

    pub fn send(&self, packet: Packet) -> Result<(), ConnError> {
        self.sender.send(packet)
    }

    pub async fn send_wait(&self, packet: Packet) -> Result<(), ConnError> {
        self.sender.send_wait(packet).await
    }

    pub fn send_message<M: Message>(&self, msg: &M) -> Result<(), ConnError> {
        self.sender.send_message(msg)
    }

    /// A cloneable handle for sending from handlers or other tasks.
    pub fn sender(&self) -> PacketSender {
        self.sender.clone()
    }

    pub fn add_handler<F>(&self, key: HandlerKey, handler: F, one_shot: bool) -> HandlerId
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        self.dispatcher.add_handler(key, handler, one_shot)
    }

    pub fn del_handler(&self, key: HandlerKey, id: HandlerId) -> bool {
        self.dispatcher.del_handler(key, id)
    }

    pub fn add_child_dispatcher(&self, child: &Dispatcher) -> Result<(), ConnError> {
        Ok(self.dispatcher.add_child(child)?)
    }

    /// The root dispatcher; clones share its registry.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Wait for the next packet matching `key`.
    pub async fn wait_for(&self, key: HandlerKey, timeout: Duration) -> Result<Packet, ConnError> {
        if matches!(*self.lifecycle(), Lifecycle::Stopped) {
            return Err(ConnError::Stopped);
        }
        let (id, rx) = self.dispatcher.once(key);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(packet)) => Ok(packet),
            Ok(Err(_)) => Err(ConnError::Stopped),
            Err(_) => {
                self.dispatcher.del_handler(key, id);
                Err(ConnError::Timeout)
            }
        }
    }

    /// Wait for the next record of type `M` and decode it.
    pub async fn wait_for_message<M: Message>(&self, timeout: Duration) -> Result<M, ConnError> {
        let packet = self.wait_for(HandlerKey::of::<M>(), timeout).await?;
        Ok(M::from_packet(&packet)?)
    }

    /// Wait until the session reaches `want`.
    pub async fn wait_for_state(
        &self,
        want: ConnectionState,
        timeout: Duration,
    ) -> Result<(), ConnError> {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| *s == want))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConnError::Stopped),
            Err(_) => Err(ConnError::Timeout),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn role(&self) -> Role {
        self.link.role
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.link.stats.snapshot()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.link.socket.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.link.peer.borrow()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.link.stop.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Drains deliveries, drives the session state and runs the timers.
pub(crate) struct Coordinator {
    link: Link,
    deliveries: mpsc::UnboundedReceiver<Packet>,
    dispatcher: Dispatcher,
    state: Arc<watch::Sender<ConnectionState>>,
    sender: PacketSender,
    started: Instant,
    ping_counter: u32,
    last_peer_ping: u32,
}

impl Coordinator {
    fn new(
        link: Link,
        deliveries: mpsc::UnboundedReceiver<Packet>,
        dispatcher: Dispatcher,
        state: Arc<watch::Sender<ConnectionState>>,
        sender: PacketSender,
    ) -> Self {
        Self {
            link,
            deliveries,
            dispatcher,
            state,
            sender,
            started: Instant::now(),
            ping_counter: 0,
            last_peer_ping: 0,
        }
    }

    async fn run(mut self) {
        let timing = self.link.timing;
        let mut ping = Periodic::new(timing.ping_interval);
        let mut report = Periodic::new(timing.stats_interval);

        while !self.link.stop.load(Ordering::Acquire) {
            match tokio::time::timeout(timing.dispatch_timeout, self.deliveries.recv()).await {
                Ok(Some(packet)) => self.on_packet(&packet),
                Ok(None) => break,
                Err(_) => {}
            }

            let now = Instant::now();
            let connected = *self.state.borrow() == ConnectionState::Connected;
            if connected {
                if ping.poll(now) {
                    self.send_ping();
                }
                if report.poll(now) {
                    log::info!("[conn] {}", self.link.stats.snapshot());
                }
            } else {
                ping.restart(now);
                report.restart(now);
            }
        }
        log::debug!("[conn] coordinator stopped");
    }

    fn on_packet(&mut self, packet: &Packet) {
        match packet.packet_type() {
            PacketType::Connect => {
                let current = *self.state.borrow();
                let accept = match self.link.role {
                    Role::Initiator => current == ConnectionState::Connecting,
                    Role::Server => current != ConnectionState::Connected,
                };
                if accept {
                    transition(&self.state, ConnectionState::Connected);
                }
            }
            PacketType::Disconnect => transition(&self.state, ConnectionState::Idle),
            PacketType::Ping => {
                if let Ok(ping) = Ping::from_packet(packet) {
                    self.last_peer_ping = ping.counter;
                }
            }
            _ => {}
        }
        self.dispatcher.dispatch(packet);
    }

    fn send_ping(&mut self) {
        self.ping_counter = self.ping_counter.wrapping_add(1);
        let ping = Ping {
            time_sent_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            counter: self.ping_counter,
            last: self.last_peer_ping,
            unknown: 0,
        };
        if let Err(e) = self.sender.send_message(&ping) {
            log::debug!("[conn] keep-alive not sent: {e}");
        }
    }
}
