//! Send worker: owns the outbound [`SendWindow`] and everything that leaves
//! the socket.
//!
//! Each tick of the loop runs three phases:
//!
//! ```text
//!   ┌─ ack ─────┐   ┌─ resend ──────────────┐   ┌─ collect ─────────────┐   ┌─ batch ──────────┐
//!   │ apply the │──▶│ no ack for ack_timeout│──▶│ pull queued packets   │──▶│ pack into frames │
//!   │ peer's ack│   │ → resend whole window │   │ for collect_interval  │   │ ≤ max payload    │
//!   └───────────┘   └───────────────────────┘   └───────────────────────┘   └──────────────────┘
//! ```
//!
//! Out-of-band packets and control requests arrive on a separate unbounded
//! channel that is always polled first; they never wait behind a full
//! window.  Sequenced packets are only pulled from the bounded queue while
//! the window has room, which is what backs pressure up to
//! [`crate::connection::Connection::send`].
//!
//! The worker is the only writer of the send window.  The receive worker
//! reports the peer's cumulative ack through a `watch` channel and flags
//! when our own ack must go out.

use std::sync::atomic::Ordering;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::connection::Link;
use crate::frame::{Frame, FrameType};
use crate::packet::{Packet, PacketType};
use crate::window::SendWindow;

/// Requests that bypass the sequenced queue.
#[derive(Debug)]
pub(crate) enum Control {
    /// Send an out-of-band packet right away.
    Oob(Packet),
    /// Reset the send window; `greeting` becomes the first new sequenced
    /// packet.
    Reset { greeting: Option<Packet> },
    /// Send a pre-built frame (RESET).
    Raw(Frame),
    /// Send a FIN carrying the current ack.
    Fin,
}

pub(crate) struct SendWorker {
    link: Link,
    window: SendWindow<Packet>,
    outbound: mpsc::Receiver<Packet>,
    control: mpsc::UnboundedReceiver<Control>,
    peer_ack: watch::Receiver<u16>,
    max_frame_payload: usize,
    last_ack_at: Instant,
}

impl SendWorker {
    pub(crate) fn new(
        link: Link,
        window: SendWindow<Packet>,
        outbound: mpsc::Receiver<Packet>,
        control: mpsc::UnboundedReceiver<Control>,
        peer_ack: watch::Receiver<u16>,
        max_frame_payload: usize,
    ) -> Self {
        Self {
            link,
            window,
            outbound,
            control,
            peer_ack,
            max_frame_payload,
            last_ack_at: Instant::now(),
        }
    }

    pub(crate) async fn run(mut self) {
        log::debug!("[send] worker started ({})", self.link.role);
        while !self.link.stop.load(Ordering::Acquire) {
            self.apply_peer_ack();
            let mut sent = self.resend_if_stale().await;

            let Some(batch) = self.collect(&mut sent).await else {
                break;
            };
            if !batch.is_empty() {
                let ack = self.local_ack();
                let frame_type = self.link.role.batch_frame_type();
                let frames = pack(frame_type, ack, batch, self.max_frame_payload);
                for frame in &frames {
                    sent |= self.transmit(frame).await;
                }
            }

            // Nothing carried our ack this tick but the peer is owed one.
            if self.link.ack_due.swap(false, Ordering::AcqRel) && !sent {
                let frame_type = self.link.role.batch_frame_type();
                let frame = Frame::batch(frame_type, self.local_ack(), Vec::new());
                self.transmit(&frame).await;
            }
        }
        log::debug!("[send] worker stopped");
    }

    fn local_ack(&self) -> u16 {
        self.link.local_ack.load(Ordering::Acquire)
    }

    fn apply_peer_ack(&mut self) {
        if !self.peer_ack.has_changed().unwrap_or(false) {
            return;
        }
        let ack = *self.peer_ack.borrow_and_update();
        let released = self.window.acknowledge(ack);
        if released > 0 {
            self.last_ack_at = Instant::now();
            log::debug!(
                "[send] ack={ack} released {released}, {} in flight",
                self.window.len()
            );
        }
    }

    /// Whole-window retransmission after `ack_timeout` without progress.
    async fn resend_if_stale(&mut self) -> bool {
        if self.window.is_empty() || self.last_ack_at.elapsed() < self.link.timing.ack_timeout {
            return false;
        }
        let packets: Vec<Packet> = self.window.iter().map(|(_, p)| p.clone()).collect();
        let count = packets.len();
        let frames = pack(
            self.link.role.batch_frame_type(),
            self.local_ack(),
            packets,
            self.max_frame_payload,
        );
        log::debug!(
            "[send] ack timeout; resending {count} packet(s) from seq {} in {} frame(s)",
            self.window.expected_seq(),
            frames.len()
        );
        let mut resent = 0;
        for frame in &frames {
            if self.transmit(frame).await {
                resent += 1;
            }
        }
        self.link.stats.frames_retransmitted(resent);
        self.last_ack_at = Instant::now();
        resent > 0
    }

    /// Gather sequenced packets for one collect interval, servicing control
    /// requests as they come.  `None` once the connection is gone.
    async fn collect(&mut self, sent: &mut bool) -> Option<Vec<Packet>> {
        let deadline = Instant::now() + self.link.timing.collect_interval;
        let mut batch = Vec::new();
        loop {
            tokio::select! {
                biased;

                ctrl = self.control.recv() => match ctrl {
                    Some(ctrl) => *sent |= self.on_control(ctrl, &mut batch).await,
                    None => return None,
                },

                pkt = self.outbound.recv(), if !self.window.is_full() => match pkt {
                    Some(pkt) if pkt.is_oob() => *sent |= self.send_oob(pkt).await,
                    Some(pkt) => self.enqueue(pkt, &mut batch),
                    None => return None,
                },

                _ = tokio::time::sleep_until(deadline) => return Some(batch),
            }
        }
    }

    async fn on_control(&mut self, ctrl: Control, batch: &mut Vec<Packet>) -> bool {
        match ctrl {
            Control::Oob(pkt) => self.send_oob(pkt).await,
            Control::Reset { greeting } => {
                self.window.reset();
                batch.clear();
                self.peer_ack.borrow_and_update();
                self.last_ack_at = Instant::now();
                log::debug!("[send] window reset to seq {}", self.window.next_seq());
                if let Some(pkt) = greeting {
                    self.enqueue(pkt, batch);
                }
                false
            }
            Control::Raw(frame) => self.transmit(&frame).await,
            Control::Fin => {
                let frame = Frame::fin(self.local_ack());
                self.transmit(&frame).await
            }
        }
    }

    /// Assign the next sequence number and hold the packet for (re)sending.
    fn enqueue(&mut self, pkt: Packet, batch: &mut Vec<Packet>) {
        if self.window.is_empty() {
            self.last_ack_at = Instant::now();
        }
        let stamped = pkt.stamped(self.window.next_seq(), 0);
        match self.window.put(stamped.clone()) {
            Ok(_) => batch.push(stamped),
            Err(e) => log::warn!("[send] dropping {} packet: {e}", pkt.packet_type()),
        }
    }

    async fn send_oob(&mut self, pkt: Packet) -> bool {
        let ack = self.local_ack();
        let frame = if pkt.packet_type() == PacketType::Ping {
            match Frame::new(FrameType::Ping, 0, 0, ack, vec![pkt]) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("[send] cannot frame ping: {e}");
                    return false;
                }
            }
        } else {
            Frame::batch(self.link.role.batch_frame_type(), ack, vec![pkt])
        };
        self.transmit(&frame).await
    }

    /// Send one frame to the current peer.  Failures are counted, not fatal.
    async fn transmit(&self, frame: &Frame) -> bool {
        let peer = *self.link.peer.borrow();
        let Some(dest) = peer else {
            log::debug!("[send] no peer yet; dropping {:?} frame", frame.frame_type());
            return false;
        };
        match self.link.socket.send_frame(frame, dest).await {
            Ok(n) => {
                self.link.stats.frame_sent(n, frame.packets().len());
                log::debug!(
                    "[send] → {:?} seq={}..{} ack={} packets={} ({n}B)",
                    frame.frame_type(),
                    frame.first_seq(),
                    frame.seq(),
                    frame.ack(),
                    frame.packets().len()
                );
                true
            }
            Err(e) => {
                self.link.stats.send_error();
                log::warn!("[send] {e}");
                false
            }
        }
    }
}

/// Split stamped packets into batch frames whose packet bytes stay within
/// `max_payload`.  A packet larger than the limit travels alone.
pub(crate) fn pack(
    frame_type: FrameType,
    ack: u16,
    packets: Vec<Packet>,
    max_payload: usize,
) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut current = Vec::new();
    let mut size = 0;
    for pkt in packets {
        let len = pkt.encoded_len();
        if !current.is_empty() && size + len > max_payload {
            frames.push(Frame::batch(frame_type, ack, std::mem::take(&mut current)));
            size = 0;
        }
        size += len;
        current.push(pkt);
    }
    if !current.is_empty() {
        frames.push(Frame::batch(frame_type, ack, current));
    }
    frames
}
