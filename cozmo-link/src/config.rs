//! Connection configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::state::Role;
use crate::timer::Timing;

/// Address a robot listens on when reached over its own access point.
pub const DEFAULT_ROBOT_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(172, 31, 1, 1)), 5551);

/// Address a server-role endpoint binds by default.
pub const DEFAULT_SERVER_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5551);

/// Ephemeral wildcard address used by initiators.
pub const ANY_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// Everything needed to bind a [`crate::connection::Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub role: Role,
    /// Local address to bind.
    pub bind_addr: SocketAddr,
    /// Fixed peer for initiators; learned from the first RESET for servers.
    pub peer_addr: Option<SocketAddr>,
    /// Slots in each sliding window; a power of two.
    pub window_size: usize,
    /// Width of sequence numbers on the wire.
    pub seq_bits: u32,
    /// First sequence number used after every window reset.
    pub initial_seq: u16,
    /// Upper bound on the packet bytes batched into one frame.
    pub max_frame_payload: usize,
    /// Capacity of the outbound sequenced-packet queue.
    pub queue_depth: usize,
    pub timing: Timing,
}

impl ConnectionConfig {
    /// Initiator talking to `peer` from an ephemeral port.
    pub fn initiator(peer: SocketAddr) -> Self {
        Self {
            role: Role::Initiator,
            bind_addr: ANY_ADDR,
            peer_addr: Some(peer),
            window_size: 256,
            seq_bits: 16,
            initial_seq: 1,
            max_frame_payload: 1024,
            queue_depth: 256,
            timing: Timing::default(),
        }
    }

    /// Server listening on `bind`.
    pub fn server(bind: SocketAddr) -> Self {
        Self {
            role: Role::Server,
            bind_addr: bind,
            peer_addr: None,
            ..Self::initiator(DEFAULT_ROBOT_ADDR)
        }
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// `Connection::bind` only accepts `seq_bits == 16`.
    pub fn with_window(mut self, size: usize, seq_bits: u32) -> Self {
        self.window_size = size;
        self.seq_bits = seq_bits;
        self
    }

    pub fn with_initial_seq(mut self, seq: u16) -> Self {
        self.initial_seq = seq;
        self
    }

    pub fn with_max_frame_payload(mut self, bytes: usize) -> Self {
        self.max_frame_payload = bytes;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::initiator(DEFAULT_ROBOT_ADDR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ConnectionConfig::default();
        assert_eq!(c.role, Role::Initiator);
        assert_eq!(c.peer_addr, Some("172.31.1.1:5551".parse().unwrap()));
        assert_eq!(c.bind_addr, "0.0.0.0:0".parse().unwrap());
        assert_eq!((c.window_size, c.seq_bits, c.initial_seq), (256, 16, 1));
        assert_eq!(c.max_frame_payload, 1024);
    }

    #[test]
    fn server_has_no_peer() {
        let c = ConnectionConfig::server(DEFAULT_SERVER_ADDR);
        assert_eq!(c.role, Role::Server);
        assert_eq!(c.bind_addr, "127.0.0.1:5551".parse().unwrap());
        assert_eq!(c.peer_addr, None);
    }

    #[test]
    fn builders_chain() {
        let c = ConnectionConfig::server(ANY_ADDR)
            .with_window(4, 3)
            .with_queue_depth(8)
            .with_initial_seq(0);
        assert_eq!((c.window_size, c.seq_bits, c.queue_depth, c.initial_seq), (4, 3, 8, 0));
    }
}
