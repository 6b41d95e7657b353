//! Receive worker: owns the inbound [`ReceiveWindow`] and everything that
//! arrives on the socket.
//!
//! For every datagram:
//!
//! ```text
//!   recv ──▶ decode ──▶ peer filter ──▶ RESET / FIN / data
//!                                              │
//!                    OOB ─────────────────────┤──▶ deliver now
//!                    sequenced ──▶ window.put ┘    window.get* ──▶ deliver in order
//! ```
//!
//! Undecodable datagrams and datagrams from the wrong address are counted
//! and dropped; nothing that arrives from the network stops the loop.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use tokio::sync::{mpsc, watch};

use crate::connection::Link;
use crate::frame::{Frame, FrameType};
use crate::packet::{Packet, PacketType};
use crate::sender::Control;
use crate::socket::SocketError;
use crate::state::Role;
use crate::window::ReceiveWindow;

pub(crate) struct ReceiveWorker {
    link: Link,
    window: ReceiveWindow<Packet>,
    deliveries: mpsc::UnboundedSender<Packet>,
    control: mpsc::UnboundedSender<Control>,
    peer_ack: watch::Sender<u16>,
}

impl ReceiveWorker {
    pub(crate) fn new(
        link: Link,
        window: ReceiveWindow<Packet>,
        deliveries: mpsc::UnboundedSender<Packet>,
        control: mpsc::UnboundedSender<Control>,
        peer_ack: watch::Sender<u16>,
    ) -> Self {
        Self {
            link,
            window,
            deliveries,
            control,
            peer_ack,
        }
    }

    pub(crate) async fn run(mut self) {
        log::debug!("[recv] worker started on {}", self.link.socket.local_addr);
        let socket = std::sync::Arc::clone(&self.link.socket);
        while !self.link.stop.load(Ordering::Acquire) {
            let received =
                match tokio::time::timeout(self.link.timing.recv_timeout, socket.recv_frame()).await {
                    Ok(r) => r,
                    Err(_) => {
                        self.apply_pending_reset();
                        continue;
                    }
                };
            match received {
                Ok((frame, from, len)) => self.on_frame(frame, from, len),
                Err(SocketError::Frame { source, from, len }) => {
                    self.link.stats.frame_dropped();
                    log::warn!("[recv] dropping {len}-byte datagram from {from}: {source}");
                }
                Err(SocketError::Io(e)) => {
                    self.link.stats.recv_error();
                    log::warn!("[recv] socket error: {e}");
                }
            }
        }
        log::debug!("[recv] worker stopped");
    }

    /// A local `connect()` asked for a fresh receive window.
    fn apply_pending_reset(&mut self) {
        if self.link.recv_reset.swap(false, Ordering::AcqRel) {
            self.reset_window();
        }
    }

    fn reset_window(&mut self) {
        self.window.reset();
        self.link
            .local_ack
            .store(self.window.last_delivered(), Ordering::Release);
        self.link.ack_due.store(false, Ordering::Release);
    }

    fn on_frame(&mut self, frame: Frame, from: SocketAddr, len: usize) {
        self.apply_pending_reset();

        if self.link.role == Role::Server && frame.frame_type() == FrameType::Reset {
            self.link.stats.frame_received(len, 0);
            self.on_reset(from);
            return;
        }

        let peer = *self.link.peer.borrow();
        if peer != Some(from) {
            self.link.stats.foreign_datagram();
            log::warn!(
                "[recv] ignoring {:?} frame from {from} (peer is {peer:?})",
                frame.frame_type()
            );
            return;
        }
        self.link.stats.frame_received(len, frame.packets().len());
        log::debug!(
            "[recv] ← {:?} seq={}..{} ack={} packets={}",
            frame.frame_type(),
            frame.first_seq(),
            frame.seq(),
            frame.ack(),
            frame.packets().len()
        );

        match frame.frame_type() {
            FrameType::Reset => log::debug!("[recv] RESET ignored in initiator role"),
            FrameType::Fin => self.on_fin(),
            _ => self.on_data(frame),
        }
    }

    /// Server side of the handshake: adopt the sender as peer, restart both
    /// windows, greet it with CONNECT and tell the coordinator.
    fn on_reset(&mut self, from: SocketAddr) {
        let previous = self.link.peer.send_replace(Some(from));
        if previous != Some(from) {
            log::info!("[recv] peer is now {from}");
        }
        self.reset_window();
        self.request(Control::Reset {
            greeting: Some(Packet::empty(PacketType::Connect)),
        });
        self.deliver(Packet::empty(PacketType::Connect));
    }

    fn on_fin(&mut self) {
        log::info!("[recv] FIN from peer");
        self.reset_window();
        self.request(Control::Reset { greeting: None });
        self.deliver(Packet::empty(PacketType::Disconnect));
    }

    fn on_data(&mut self, frame: Frame) {
        self.peer_ack.send_replace(frame.ack());

        let mut sequenced = false;
        for pkt in frame.into_packets() {
            if pkt.is_oob() {
                self.deliver(pkt);
                continue;
            }
            sequenced = true;
            let seq = pkt.seq();
            if !self.window.put(seq, pkt) {
                self.link.stats.packet_discarded();
                log::debug!(
                    "[recv] discarding seq={seq}, window is {}..={}",
                    self.window.expected_seq(),
                    self.window.last_seq()
                );
            }
        }

        while let Some(pkt) = self.window.get() {
            self.deliver(pkt);
        }
        self.link
            .local_ack
            .store(self.window.last_delivered(), Ordering::Release);
        // Duplicates still earn an ack so a peer whose ack was lost stops
        // retransmitting.
        if sequenced {
            self.link.ack_due.store(true, Ordering::Release);
        }
    }

    fn deliver(&self, pkt: Packet) {
        self.link.stats.packet_delivered();
        let _ = self.deliveries.send(pkt);
    }

    fn request(&self, ctrl: Control) {
        if self.control.send(ctrl).is_err() {
            log::debug!("[recv] send worker is gone");
        }
    }
}
