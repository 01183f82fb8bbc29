//! Wire packet header.
//!
//! ```text
//! [Type(1)] [Reserved(1)] [Reserved(2)] [Payload(N)]
//! ```
//!
//! The payload length is implicit: datagram length minus the header.

use crate::core::bit_buffer::{BitBuffer, BitSlice};
use crate::error::{Result, TransportError};

/// Size of the fixed packet header in bytes
pub const PACKET_HEADER_SIZE: usize = 4;

/// Kind of datagram on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    ConnectionRequest = 1,
    ConnectionReject = 2,
    ConnectionAccept = 3,
    Disconnect = 4,
    Data = 5,
    /// One piece of a payload too large for a single datagram
    Fragment = 6,
}

impl PacketType {
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            PacketType::ConnectionRequest
                | PacketType::ConnectionReject
                | PacketType::ConnectionAccept
        )
    }

    /// Whether the packet carries application payload
    pub fn carries_payload(self) -> bool {
        matches!(self, PacketType::Data | PacketType::Fragment)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PacketType::ConnectionRequest),
            2 => Ok(PacketType::ConnectionReject),
            3 => Ok(PacketType::ConnectionAccept),
            4 => Ok(PacketType::Disconnect),
            5 => Ok(PacketType::Data),
            6 => Ok(PacketType::Fragment),
            other => Err(TransportError::UnknownPacketType(other)),
        }
    }
}

/// Fixed four byte header preceding every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType) -> Self {
        Self { packet_type }
    }

    /// Header bytes ready to be gathered in front of a payload
    pub fn to_bytes(self) -> [u8; PACKET_HEADER_SIZE] {
        [self.packet_type as u8, 0, 0, 0]
    }

    pub fn write(&self, buffer: &mut BitBuffer) -> Result<()> {
        buffer.write_bytes(&self.to_bytes())
    }

    /// Parse a header, leaving the cursor at the start of the payload.
    ///
    /// Reserved fields are ignored.
    pub fn read(slice: &mut BitSlice<'_>) -> Result<Self> {
        let bytes = slice
            .read_bytes(PACKET_HEADER_SIZE)
            .map_err(|_| TransportError::InvalidHeader)?;
        Ok(Self {
            packet_type: PacketType::try_from(bytes[0])?,
        })
    }

    /// Parse the header at the front of a raw datagram
    pub fn from_bytes(datagram: &[u8]) -> Result<Self> {
        Self::read(&mut BitSlice::new(datagram))
    }
}
