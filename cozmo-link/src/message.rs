//! Typed records carried in packet payloads.
//!
//! The transport itself only moves opaque [`Packet`]s.  A [`Message`] gives a
//! payload layout a Rust type: it knows its packet kind, its optional
//! one-byte message id, and how to encode/decode its fields with the
//! [`crate::codec`] primitives.
//!
//! Only the records the transport needs itself live here ([`Connect`],
//! [`Disconnect`], [`Ping`]).  Application commands and events implement
//! [`Message`] in the crates that consume this one.

use crate::codec::{CodecError, Reader, Writer};
use crate::packet::{Packet, PacketError, PacketType};

/// A payload layout bound to one packet kind.
pub trait Message: Sized {
    /// Kind of packet this record travels in.
    const PACKET_TYPE: PacketType;

    /// Message id written as the first payload byte, for ACTION/EVENT kinds.
    const ID: Option<u8> = None;

    /// Append the record's fields (not the id) to `w`.
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError>;

    /// Read the record's fields (not the id) from `r`.
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError>;

    /// Size of the fields written by [`Message::encode`].
    fn encoded_len(&self) -> usize;

    /// Encode into a ready-to-send packet.
    fn to_packet(&self) -> Result<Packet, PacketError> {
        let id_len = usize::from(Self::ID.is_some());
        let mut w = Writer::with_capacity(id_len + self.encoded_len());
        if let Some(id) = Self::ID {
            w.write(id);
        }
        self.encode(&mut w)?;
        Packet::new(Self::PACKET_TYPE, w.into_bytes())
    }

    /// Decode from a received packet.
    ///
    /// Fails on a packet of another kind or id, on truncation, and on
    /// leftover bytes.
    fn from_packet(packet: &Packet) -> Result<Self, PacketError> {
        if packet.packet_type() != Self::PACKET_TYPE {
            return Err(PacketError::WrongType {
                expected: Self::PACKET_TYPE,
                actual: packet.packet_type(),
            });
        }
        let mut r = Reader::new(packet.payload());
        if let Some(expected) = Self::ID {
            let actual = r.read::<u8>().ok();
            if actual != Some(expected) {
                return Err(PacketError::WrongId { expected, actual });
            }
        }
        let msg = Self::decode(&mut r)?;
        r.finish()?;
        Ok(msg)
    }
}

/// Session opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Connect;

impl Message for Connect {
    const PACKET_TYPE: PacketType = PacketType::Connect;

    fn encode(&self, _w: &mut Writer) -> Result<(), CodecError> {
        Ok(())
    }

    fn decode(_r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Connect)
    }

    fn encoded_len(&self) -> usize {
        0
    }
}

/// Session closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Disconnect;

impl Message for Disconnect {
    const PACKET_TYPE: PacketType = PacketType::Disconnect;

    fn encode(&self, _w: &mut Writer) -> Result<(), CodecError> {
        Ok(())
    }

    fn decode(_r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Disconnect)
    }

    fn encoded_len(&self) -> usize {
        0
    }
}

/// Keep-alive probe.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ping {
    /// Sender's clock when the probe left, in milliseconds.
    pub time_sent_ms: f64,
    /// Monotonic probe counter.
    pub counter: u32,
    /// Counter of the last probe seen from the peer.
    pub last: u32,
    pub unknown: u8,
}

impl Message for Ping {
    const PACKET_TYPE: PacketType = PacketType::Ping;

    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.write(self.time_sent_ms);
        w.write(self.counter);
        w.write(self.last);
        w.write(self.unknown);
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            time_sent_ms: r.read()?,
            counter: r.read()?,
            last: r.read()?,
            unknown: r.read()?,
        })
    }

    fn encoded_len(&self) -> usize {
        8 + 4 + 4 + 1
    }
}
