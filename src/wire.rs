//! The 1-byte transport header framing every control datagram.
//!
//! Layout:
//!
//! ```text
//! 0b01 000111
//!   ^  ^^^^^^
//!   |  |
//!   |  +---- sequence number (low 6 bits)
//!   +------- packet class (high 2 bits)
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;

/// The largest sequence number the 6-bit header field can carry.
pub const MAX_SEQUENCE_NUMBER: u8 = SEQUENCE_MASK;

/// The sequence number assigned to a peer on first contact.
pub const INITIAL_SEQUENCE_NUMBER: u8 = 1;

const CLASS_SHIFT: u8 = 6;
const CLASS_MASK: u8 = 0b1100_0000;
const SEQUENCE_MASK: u8 = 0b0011_1111;

/// The transport-level class of a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketClass {
    /// Application data that must be acknowledged.
    Data = 0,
    /// Application data delivered without any transport bookkeeping.
    DataNoAck = 1,
    /// An acknowledgement for a previously received data packet.
    Ack = 2,
}

impl TryFrom<u8> for PacketClass {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self, Error> {
        match raw {
            0 => Ok(PacketClass::Data),
            1 => Ok(PacketClass::DataNoAck),
            2 => Ok(PacketClass::Ack),
            _ => Err(Error::InvalidPacketClass(raw)),
        }
    }
}

/// The decoded transport header of a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub class: PacketClass,
    pub sequence: u8,
}

impl Header {
    /// Creates a header, rejecting sequence numbers the field can't encode.
    pub fn new(class: PacketClass, sequence: u8) -> Result<Self, Error> {
        if sequence > MAX_SEQUENCE_NUMBER {
            return Err(Error::SequenceOutOfRange(sequence));
        }

        Ok(Self { class, sequence })
    }

    /// Encodes the header into its wire byte.
    pub fn encode(&self) -> u8 {
        ((self.class as u8) << CLASS_SHIFT) | (self.sequence & SEQUENCE_MASK)
    }

    /// Decodes a wire byte into a header.
    pub fn decode(raw: u8) -> Result<Self, Error> {
        let class = PacketClass::try_from((raw & CLASS_MASK) >> CLASS_SHIFT)?;

        Ok(Self {
            class,
            sequence: raw & SEQUENCE_MASK,
        })
    }
}

/// Returns the sequence number following `sequence`, wrapping the 6-bit space.
pub fn next_sequence(sequence: u8) -> u8 {
    if sequence >= MAX_SEQUENCE_NUMBER {
        0
    } else {
        sequence + 1
    }
}

/// Prepends a transport header to an application payload.
pub fn frame(class: PacketClass, sequence: u8, payload: &[u8]) -> Result<Bytes, Error> {
    let header = Header::new(class, sequence)?;

    let mut framed = BytesMut::with_capacity(1 + payload.len());
    framed.put_u8(header.encode());
    framed.put_slice(payload);

    Ok(framed.freeze())
}

/// Builds a standalone acknowledgement packet.
pub fn ack_packet(sequence: u8) -> Result<Bytes, Error> {
    frame(PacketClass::Ack, sequence, &[])
}

/// Splits a datagram into its header and the remaining payload bytes.
pub fn strip(packet: &[u8]) -> Result<(Header, Bytes), Error> {
    let (&raw, payload) = packet.split_first().ok_or(Error::EmptyDatagram)?;
    let header = Header::decode(raw)?;

    Ok((header, Bytes::copy_from_slice(payload)))
}
