//! Session state and endpoint role.
//!
//! The session state machine is deliberately small:
//!
//! ```text
//!            connect()            CONNECT received
//!   IDLE ───────────────▶ CONNECTING ───────────────▶ CONNECTED
//!    ▲                                                    │
//!    └──────────── disconnect() / DISCONNECT / FIN ───────┘
//! ```
//!
//! Transitions themselves live in [`crate::connection`].  A server-role
//! endpoint skips CONNECTING: the RESET it answers is delivered locally as a
//! CONNECT, which moves it straight from IDLE to CONNECTED.

use crate::frame::FrameType;

/// Where a session currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; initial state.
    #[default]
    Idle,
    /// RESET sent; waiting for the peer's CONNECT.
    Connecting,
    /// Handshake complete; keep-alives running.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Idle => "IDLE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
        };
        f.write_str(s)
    }
}

/// Which side of the link this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Talks to a fixed peer and opens sessions with `connect()`.
    Initiator,
    /// Bound endpoint that answers RESETs from whoever sends them.
    Server,
}

impl Role {
    /// Frame type used for batches sent from this role.
    pub fn batch_frame_type(self) -> FrameType {
        match self {
            Role::Initiator => FrameType::Engine,
            Role::Server => FrameType::Robot,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Server => f.write_str("server"),
        }
    }
}
