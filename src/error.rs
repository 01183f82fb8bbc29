//! # Error Types
//!
//! Error handling for the datagram transport.
//!
//! This module defines every error variant the transport can surface, from
//! socket-level I/O failures to malformed packets and exhausted capacity.
//!
//! ## Error Categories
//! - **Capacity Errors**: Connection table full, event queue full, bit buffer overflow
//! - **Transport Errors**: Bind failures and socket errors other than would-block
//! - **Protocol Errors**: Malformed headers, unknown packet types, inconsistent fragments
//! - **Configuration Errors**: Invalid or unreadable configuration
//!
//! A handshake timeout is *not* an error: it is reported to the application
//! as an ordinary `Disconnect` event.
//!
//! ## Example Usage
//! ```rust
//! use datagram_transport::core::bit_buffer::BitBuffer;
//! use datagram_transport::error::{TransportError, Result};
//! use tracing::{info, warn};
//!
//! fn pack(buffer: &mut BitBuffer, values: &[u32]) -> Result<()> {
//!     for &value in values {
//!         buffer.write_int(value as i32)?;
//!     }
//!     Ok(())
//! }
//!
//! let mut buffer = BitBuffer::new(4);
//! match pack(&mut buffer, &[1, 2]) {
//!     Ok(()) => info!("packed"),
//!     Err(TransportError::BufferOverflow { requested, remaining }) => {
//!         warn!(requested, remaining, "buffer too small")
//!     }
//!     Err(e) => warn!(error = %e, "unexpected error"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Endpoint validation
    pub const ERR_ZERO_PORT: &str = "port 0 is reserved";
    pub const ERR_WRONG_FAMILY: &str = "endpoint family does not match the channel";

    /// Channel state
    pub const ERR_NOT_BOUND: &str = "channel is not bound";
    pub const ERR_ALREADY_BOUND: &str = "channel is already bound";
    pub const ERR_ADDRESS_IN_USE: &str = "endpoint already registered";
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Fragment validation
    pub const ERR_FRAGMENT_COUNT: &str = "fragment count exceeds reassembly capacity";
    pub const ERR_FRAGMENT_SEQUENCE: &str = "fragment sequence number out of range";
    pub const ERR_FRAGMENT_LENGTH: &str = "fragment length inconsistent with payload";
}

// TransportError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(&'static str),

    #[error("Channel is not bound")]
    NotBound,

    #[error("Connection table is full")]
    ConnectionTableFull,

    #[error("Event queue for slot {0} is full")]
    EventQueueFull(u16),

    #[error("Buffer overflow: {requested} bits requested, {remaining} remaining")]
    BufferOverflow { requested: usize, remaining: usize },

    #[error("Buffer underflow: {requested} bits requested, {remaining} remaining")]
    BufferUnderflow { requested: usize, remaining: usize },

    #[error("Invalid bit count: {0} (expected 1-32)")]
    InvalidBitCount(u32),

    #[error("Invalid packet header")]
    InvalidHeader,

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Malformed fragment: {0}")]
    MalformedFragment(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using TransportError
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Whether this error came from a capacity limit rather than a fault.
    ///
    /// Capacity errors are recoverable by dropping the offending operation.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionTableFull
                | TransportError::EventQueueFull(_)
                | TransportError::BufferOverflow { .. }
                | TransportError::OversizedPacket(_)
        )
    }
}
