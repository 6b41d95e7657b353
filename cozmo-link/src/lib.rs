//! `cozmo-link`: reliable, ordered packet delivery over the Cozmo UDP
//! protocol.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  frames   ┌─────────────┐
//!  │ SendWorker │──────────▶│             │
//!  └─────▲──────┘           │   Socket    │  (thin async wrapper around tokio UdpSocket)
//!        │ acks             │             │
//!  ┌─────┴─────────┐ frames │             │
//!  │ ReceiveWorker │◀───────│             │
//!  └─────┬─────────┘        └─────────────┘
//!        │ packets, in order
//!  ┌─────▼───────────────────────────────┐
//!  │ Coordinator                         │
//!  │ (state machine, keep-alive, stats)  │
//!  └─────┬───────────────────────────────┘
//!        │ dispatch
//!  ┌─────▼──────┐      ┌──────────────────┐
//!  │ Dispatcher │─────▶│ child Dispatcher │
//!  └────────────┘      └──────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`codec`]       - little-endian primitive reader/writer
//! - [`packet`]      - packet kinds and length-delimited packet records
//! - [`frame`]       - datagram envelope (serialise / deserialise)
//! - [`message`]     - typed records carried in packet payloads
//! - [`seq`]         - wraparound sequence-number arithmetic
//! - [`window`]      - send and receive sliding windows
//! - [`socket`]      - async UDP socket abstraction
//! - [`sender`]      - send worker task
//! - [`receiver`]    - receive worker task
//! - [`dispatch`]    - handler registry
//! - [`state`]       - session state and endpoint role
//! - [`timer`]       - timing parameters and periodic deadlines
//! - [`config`]      - connection configuration
//! - [`stats`]       - traffic counters
//! - [`connection`]  - coordinator and public connection API
//! - [`simulator`]   - fault-injecting relay for testing

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod frame;
pub mod message;
pub mod packet;
pub(crate) mod receiver;
pub(crate) mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod stats;
pub mod timer;
pub mod window;

pub use config::ConnectionConfig;
pub use connection::{ConnError, Connection, PacketSender};
pub use dispatch::{DispatchError, Dispatcher, HandlerId, HandlerKey};
pub use frame::{Frame, FrameType};
pub use message::Message;
pub use packet::{Packet, PacketType};
pub use state::{ConnectionState, Role};
