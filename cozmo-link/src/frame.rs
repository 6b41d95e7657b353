//! Frame: the envelope of a single UDP datagram.
//!
//! Every datagram exchanged with the robot is one [`Frame`].  A frame carries
//! a fixed header and zero or more [`Packet`]s.  This module is responsible
//! for:
//! - Validating the magic marker and minimum length of inbound datagrams.
//! - Assigning sequence/ack stamps to the packets of a decoded batch frame.
//! - Serialising outbound frames, batched or single-packet.
//!
//! # Wire format
//!
//! All multi-byte integers are **little-endian**.
//!
//! ```text
//! offset 0   : 7 bytes   magic "COZ\x03RE\x01"
//! offset 7   : 1 byte    frame type
//! offset 8   : 2 bytes   first_seq
//! offset 10  : 2 bytes   seq
//! offset 12  : 2 bytes   ack
//! offset 14  : payload
//! ```
//!
//! ENGINE and ROBOT frames carry a concatenation of length-delimited
//! packets.  Every other frame type carries at most one packet whose type
//! equals the frame type, written raw with no type or length prefix.

use thiserror::Error;

use crate::codec::{CodecError, Reader, Writer};
use crate::packet::{Packet, PacketError, PacketType};

/// Magic marker that opens every frame.
pub const FRAME_ID: &[u8; 7] = b"COZ\x03RE\x01";

/// Magic marker + type + three 16-bit header fields.
pub const FRAME_HEADER_LEN: usize = 14;

/// Sentinel sequence number for frames outside the sequenced stream.
pub const OOB_SEQ: u16 = 0xffff;

/// Frame kinds, keyed by the type byte at offset 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Initiator asks the peer to start a fresh session.
    Reset,
    /// Peer is tearing the session down.
    Fin,
    /// Single raw ACTION packet.
    Action,
    /// Batch frame sent by the controlling process.
    Engine,
    /// Batch frame sent by the robot.
    Robot,
    /// Single raw PING packet.
    Ping,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => FrameType::Reset,
            0x03 => FrameType::Fin,
            0x04 => FrameType::Action,
            0x07 => FrameType::Engine,
            0x09 => FrameType::Robot,
            0x0b => FrameType::Ping,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        match self {
            FrameType::Reset => 0x01,
            FrameType::Fin => 0x03,
            FrameType::Action => 0x04,
            FrameType::Engine => 0x07,
            FrameType::Robot => 0x09,
            FrameType::Ping => 0x0b,
        }
    }

    /// ENGINE and ROBOT frames hold a list of length-delimited packets.
    pub fn is_batch(self) -> bool {
        matches!(self, FrameType::Engine | FrameType::Robot)
    }
}

/// Errors that can arise when building or parsing a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Datagram shorter than [`FRAME_HEADER_LEN`].
    #[error("frame of {0} bytes is shorter than the 14-byte header")]
    TooShort(usize),
    /// The first seven bytes are not [`FRAME_ID`].
    #[error("bad frame magic")]
    BadMagic,
    /// Type byte does not name a known frame kind.
    #[error("unknown frame type 0x{0:02x}")]
    UnknownFrameType(u8),
    /// A batch frame contained a packet of an unrecognised kind.
    #[error("unexpected packet type 0x{0:02x} in batch frame")]
    UnexpectedPacketType(u8),
    /// A non-batch frame was given more than one packet.
    #[error("{frame_type:?} frame carries at most one packet, got {count}")]
    TooManyPackets { frame_type: FrameType, count: usize },
    /// A non-batch frame was given a packet of a different kind.
    #[error("{frame_type:?} frame cannot carry a {packet_type} packet")]
    PacketTypeMismatch {
        frame_type: FrameType,
        packet_type: PacketType,
    },
    /// A packet inside the frame was truncated.
    #[error("truncated packet: {0}")]
    Codec(#[from] CodecError),
    /// The raw payload of a non-batch frame is not a valid packet.
    #[error("invalid packet: {0}")]
    Packet(#[from] PacketError),
}

/// A decoded or ready-to-send datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    first_seq: u16,
    seq: u16,
    ack: u16,
    packets: Vec<Packet>,
}

impl Frame {
    /// Build a frame, validating the packet list against the frame type.
    pub fn new(
        frame_type: FrameType,
        first_seq: u16,
        seq: u16,
        ack: u16,
        packets: Vec<Packet>,
    ) -> Result<Self, FrameError> {
        if !frame_type.is_batch() {
            if packets.len() > 1 {
                return Err(FrameError::TooManyPackets {
                    frame_type,
                    count: packets.len(),
                });
            }
            if let Some(pkt) = packets.first() {
                if pkt.packet_type().to_u8() != frame_type.to_u8() {
                    return Err(FrameError::PacketTypeMismatch {
                        frame_type,
                        packet_type: pkt.packet_type(),
                    });
                }
            }
        }
        Ok(Self {
            frame_type,
            first_seq,
            seq,
            ack,
            packets,
        })
    }

    /// Batch frame whose header is derived from its already-stamped packets.
    ///
    /// `first_seq`/`seq` are the stamps of the first and last sequenced
    /// packet, or zero when the frame only carries out-of-band packets.
    pub fn batch(frame_type: FrameType, ack: u16, packets: Vec<Packet>) -> Self {
        debug_assert!(frame_type.is_batch());
        let mut sequenced = packets.iter().filter(|p| !p.is_oob()).map(Packet::seq);
        let first_seq = sequenced.next().unwrap_or(0);
        let seq = sequenced.last().unwrap_or(first_seq);
        Self {
            frame_type,
            first_seq,
            seq,
            ack,
            packets,
        }
    }

    /// Session-opening RESET frame: no payload, sentinel header values.
    pub fn reset() -> Self {
        Self {
            frame_type: FrameType::Reset,
            first_seq: OOB_SEQ,
            seq: OOB_SEQ,
            ack: OOB_SEQ,
            packets: Vec::new(),
        }
    }

    /// Session-closing FIN frame.
    pub fn fin(ack: u16) -> Self {
        Self {
            frame_type: FrameType::Fin,
            first_seq: OOB_SEQ,
            seq: OOB_SEQ,
            ack,
            packets: Vec::new(),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn first_seq(&self) -> u16 {
        self.first_seq
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn ack(&self) -> u16 {
        self.ack
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn into_packets(self) -> Vec<Packet> {
        self.packets
    }

    /// Size of [`Self::to_bytes`] output.
    pub fn encoded_len(&self) -> usize {
        let body: usize = if self.frame_type.is_batch() {
            self.packets.iter().map(Packet::encoded_len).sum()
        } else {
            self.packets.iter().map(|p| p.payload().len()).sum()
        };
        FRAME_HEADER_LEN + body
    }

    /// Serialise into a datagram payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.encoded_len());
        w.write_bytes(FRAME_ID);
        w.write(self.frame_type.to_u8());
        w.write(self.first_seq);
        w.write(self.seq);
        w.write(self.ack);
        for pkt in &self.packets {
            if self.frame_type.is_batch() {
                pkt.write_to(&mut w);
            } else {
                w.write_bytes(pkt.payload());
            }
        }
        w.into_bytes()
    }

    /// Parse a datagram.
    ///
    /// Sequenced packets of a batch frame are stamped with consecutive
    /// sequence numbers from `first_seq` and with the frame's `ack`;
    /// out-of-band packets are stamped `0/0`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(FrameError::TooShort(buf.len()));
        }
        let mut r = Reader::new(buf);
        if r.read_bytes(FRAME_ID.len())? != FRAME_ID {
            return Err(FrameError::BadMagic);
        }
        let type_byte = r.read::<u8>()?;
        let frame_type =
            FrameType::from_u8(type_byte).ok_or(FrameError::UnknownFrameType(type_byte))?;
        let first_seq = r.read::<u16>()?;
        let seq = r.read::<u16>()?;
        let ack = r.read::<u16>()?;
        let body = r.read_rest();

        let packets = if frame_type.is_batch() {
            decode_batch(body, first_seq, ack)?
        } else if body.is_empty() {
            Vec::new()
        } else {
            let pkt = Packet::new(PacketType::from_u8(type_byte), body.to_vec())?;
            let pkt = if pkt.is_oob() {
                pkt
            } else {
                pkt.stamped(first_seq, ack)
            };
            vec![pkt]
        };

        Ok(Self {
            frame_type,
            first_seq,
            seq,
            ack,
            packets,
        })
    }
}

fn decode_batch(body: &[u8], first_seq: u16, ack: u16) -> Result<Vec<Packet>, FrameError> {
    let mut packets = Vec::new();
    let mut offset = 0;
    let mut next_seq = first_seq;
    while offset < body.len() {
        let (pkt, used) = Packet::from_bytes(body, offset)?;
        offset += used;
        let kind = pkt.packet_type();
        if !kind.is_known() {
            return Err(FrameError::UnexpectedPacketType(kind.to_u8()));
        }
        if kind.is_oob() {
            packets.push(pkt);
        } else {
            packets.push(pkt.stamped(next_seq, ack));
            next_seq = next_seq.wrapping_add(1);
        }
    }
    Ok(packets)
}
