//! Packet: the typed, length-delimited record carried inside a frame.
//!
//! A [`Packet`] is the unit the application sends and receives.  Frames (see
//! [`crate::frame`]) batch one or more packets into a single datagram.  This
//! module is responsible for:
//! - The closed set of packet kinds ([`PacketType`]) and their out-of-band
//!   classification.
//! - Serialising a packet into its length-delimited form and parsing it
//!   back out of a larger buffer.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **little-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |        Payload Length         |  Payload ...  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The sequence and acknowledgement numbers are **not** part of the packet
//! encoding; they are derived from the enclosing frame header on decode.

use thiserror::Error;

use crate::codec::{CodecError, Reader, Writer};

/// Byte length of the type + length prefix.
pub const PACKET_HEADER_LEN: usize = 3;

/// Largest payload a 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Packet kinds, keyed by the one-byte type on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Session opened; sequenced.
    Connect,
    /// Session closed; sequenced.
    Disconnect,
    /// Application command; sequenced.
    Action,
    /// Application event; out-of-band.
    Event,
    /// Reserved kind `0x0a`; out-of-band.
    Reserved,
    /// Keep-alive; out-of-band.
    Ping,
    /// Any other type byte.  Only appears in non-batch frames.
    Unknown(u8),
}

impl PacketType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x02 => PacketType::Connect,
            0x03 => PacketType::Disconnect,
            0x04 => PacketType::Action,
            0x05 => PacketType::Event,
            0x0a => PacketType::Reserved,
            0x0b => PacketType::Ping,
            v => PacketType::Unknown(v),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            PacketType::Connect => 0x02,
            PacketType::Disconnect => 0x03,
            PacketType::Action => 0x04,
            PacketType::Event => 0x05,
            PacketType::Reserved => 0x0a,
            PacketType::Ping => 0x0b,
            PacketType::Unknown(v) => v,
        }
    }

    /// `false` only for [`PacketType::Unknown`].
    pub fn is_known(self) -> bool {
        !matches!(self, PacketType::Unknown(_))
    }

    /// Out-of-band kinds bypass the sliding window and are delivered on
    /// arrival.  Everything from EVENT upwards is out-of-band.
    pub fn is_oob(self) -> bool {
        self.to_u8() >= PacketType::Event.to_u8()
    }

    /// Kinds whose payload starts with a one-byte message id.
    pub fn has_message_id(self) -> bool {
        matches!(self, PacketType::Action | PacketType::Event)
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Unknown(v) => write!(f, "Unknown(0x{v:02x})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Errors raised while constructing a packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// The payload does not fit the 16-bit length field.
    #[error("payload of {0} bytes exceeds the 65535-byte limit")]
    PayloadTooLarge(usize),
    /// The payload of a typed record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(#[from] CodecError),
    /// A typed record was read from a packet of the wrong kind.
    #[error("expected {expected} packet, got {actual}")]
    WrongType {
        expected: PacketType,
        actual: PacketType,
    },
    /// A typed record was read from a packet carrying a different message id.
    #[error("expected message id 0x{expected:02x}, got {actual:?}")]
    WrongId { expected: u8, actual: Option<u8> },
}

/// A single typed record.
///
/// Immutable once built: the payload is validated at construction, and the
/// sequence/ack stamps are only assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    packet_type: PacketType,
    seq: u16,
    ack: u16,
    payload: Vec<u8>,
}

impl Packet {
    /// Build an unsequenced packet.
    ///
    /// Fails if `payload` is longer than [`MAX_PAYLOAD_LEN`].
    pub fn new(packet_type: PacketType, payload: Vec<u8>) -> Result<Self, PacketError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(PacketError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            packet_type,
            seq: 0,
            ack: 0,
            payload,
        })
    }

    /// A packet with no payload (CONNECT, DISCONNECT, ...).
    pub fn empty(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            seq: 0,
            ack: 0,
            payload: Vec::new(),
        }
    }

    /// Copy of this packet carrying the given sequence and ack numbers.
    pub(crate) fn stamped(&self, seq: u16, ack: u16) -> Self {
        Self {
            seq,
            ack,
            ..self.clone()
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn ack(&self) -> u16 {
        self.ack
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_oob(&self) -> bool {
        self.packet_type.is_oob()
    }

    /// First payload byte of ACTION/EVENT packets.
    pub fn message_id(&self) -> Option<u8> {
        if self.packet_type.has_message_id() {
            self.payload.first().copied()
        } else {
            None
        }
    }

    /// Size of [`Self::to_bytes`] output.
    pub fn encoded_len(&self) -> usize {
        PACKET_HEADER_LEN + self.payload.len()
    }

    /// `type || length || payload`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.encoded_len());
        self.write_to(&mut w);
        w.into_bytes()
    }

    pub(crate) fn write_to(&self, w: &mut Writer) {
        w.write(self.packet_type.to_u8());
        // Cannot truncate: the length was checked in `new`.
        w.write(self.payload.len() as u16);
        w.write_bytes(&self.payload);
    }

    /// Parse one packet starting at `offset`.
    ///
    /// Returns the packet (with zero sequence/ack stamps) and the number of
    /// bytes consumed, so callers can walk a buffer of concatenated packets.
    pub fn from_bytes(buf: &[u8], offset: usize) -> Result<(Self, usize), CodecError> {
        let tail = buf.get(offset..).ok_or(CodecError::Truncated {
            needed: offset,
            remaining: buf.len(),
        })?;
        let mut r = Reader::new(tail);
        let packet_type = PacketType::from_u8(r.read::<u8>()?);
        let len = r.read::<u16>()? as usize;
        let payload = r.read_bytes(len)?.to_vec();
        Ok((
            Self {
                packet_type,
                seq: 0,
                ack: 0,
                payload,
            },
            r.position(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_byte_roundtrip() {
        for b in 0u8..=255 {
            assert_eq!(PacketType::from_u8(b).to_u8(), b);
        }
        assert_eq!(PacketType::from_u8(0x0b), PacketType::Ping);
        assert_eq!(PacketType::from_u8(0x01), PacketType::Unknown(0x01));
    }

    #[test]
    fn oob_classification() {
        assert!(!PacketType::Connect.is_oob());
        assert!(!PacketType::Disconnect.is_oob());
        assert!(!PacketType::Action.is_oob());
        assert!(PacketType::Event.is_oob());
        assert!(PacketType::Reserved.is_oob());
        assert!(PacketType::Ping.is_oob());
        assert!(!PacketType::Unknown(0x01).is_oob());
        assert!(PacketType::Unknown(0x07).is_oob());
    }

    #[test]
    fn encode_layout() {
        let pkt = Packet::new(PacketType::Action, vec![0x42, 0xaa, 0xbb]).unwrap();
        assert_eq!(pkt.to_bytes(), vec![0x04, 0x03, 0x00, 0x42, 0xaa, 0xbb]);
        assert_eq!(pkt.encoded_len(), 6);
        assert_eq!(pkt.message_id(), Some(0x42));
    }

    #[test]
    fn decode_reports_bytes_consumed() {
        let a = Packet::new(PacketType::Action, vec![1, 2]).unwrap();
        let b = Packet::empty(PacketType::Connect);
        let mut buf = a.to_bytes();
        buf.extend(b.to_bytes());

        let (first, used) = Packet::from_bytes(&buf, 0).unwrap();
        assert_eq!(first, a);
        assert_eq!(used, 5);
        let (second, used2) = Packet::from_bytes(&buf, used).unwrap();
        assert_eq!(second, b);
        assert_eq!(used + used2, buf.len());
    }

    #[test]
    fn decode_truncated_payload_fails() {
        let mut bytes = Packet::new(PacketType::Event, vec![9; 8]).unwrap().to_bytes();
        bytes.pop();
        assert!(matches!(
            Packet::from_bytes(&bytes, 0),
            Err(CodecError::Truncated { needed: 8, remaining: 7 })
        ));
    }

    #[test]
    fn decode_offset_past_end_fails() {
        assert!(Packet::from_bytes(&[0x02, 0, 0], 4).is_err());
    }

    #[test]
    fn oversized_payload_rejected_at_construction() {
        let err = Packet::new(PacketType::Action, vec![0; MAX_PAYLOAD_LEN + 1]).unwrap_err();
        assert_eq!(err, PacketError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1));
        assert!(Packet::new(PacketType::Action, vec![0; MAX_PAYLOAD_LEN]).is_ok());
    }

    #[test]
    fn message_id_only_for_action_and_event() {
        let ping = Packet::new(PacketType::Ping, vec![7]).unwrap();
        assert_eq!(ping.message_id(), None);
        assert_eq!(Packet::empty(PacketType::Event).message_id(), None);
    }
}
