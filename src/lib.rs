//! # Datagram Transport
//!
//! A small connection-oriented transport over unreliable datagram channels.
//!
//! ## Features
//! - Bit-packed serialization through [`BitBuffer`]
//! - Fixed-capacity connection table with generation-tagged handles
//! - Request/accept handshake with retry, timeout and idle disconnect
//! - Per-connection event queues preserving global arrival order
//! - Best-effort fragmentation of payloads larger than one datagram
//! - UDP and in-process channel providers behind one trait
//!
//! ## Example
//! ```rust
//! use datagram_transport::config::TransportConfig;
//! use datagram_transport::core::bit_buffer::BitBuffer;
//! use datagram_transport::core::endpoint::Endpoint;
//! use datagram_transport::protocol::driver::TransportDriver;
//! use datagram_transport::protocol::event_queue::EventType;
//! use datagram_transport::transport::LocalRegistry;
//!
//! # fn main() -> datagram_transport::error::Result<()> {
//! let registry = LocalRegistry::default();
//! let mut server = TransportDriver::new(registry.channel(), TransportConfig::default())?;
//! let mut client = TransportDriver::new(registry.channel(), TransportConfig::default())?;
//! server.bind(&Endpoint::local(1, 7000))?;
//! client.bind(&Endpoint::local(2, 7000))?;
//! server.listen();
//!
//! let handle = client.connect(Endpoint::local(1, 7000))?;
//! server.update()?;
//! client.update()?;
//! assert_eq!(client.pop_event().map(|e| e.kind), Some(EventType::Connect));
//!
//! let mut message = BitBuffer::new(16);
//! message.write_int(42)?;
//! client.send(handle, &message);
//!
//! server.update()?;
//! while let Some(event) = server.pop_event() {
//!     if event.kind == EventType::Data {
//!         assert_eq!(event.data, 42i32.to_le_bytes());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//! A driver is single-threaded and never blocks. Everything happens inside
//! [`protocol::driver::TransportDriver::update`]; hosts with several threads
//! must confine each driver to one owner.

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::{NetworkConfig, TransportConfig};
pub use crate::core::bit_buffer::{BitBuffer, BitSlice};
pub use crate::core::endpoint::{Endpoint, TransportFamily};
pub use crate::core::handle::ConnectionHandle;
pub use crate::error::{Result, TransportError};
pub use crate::protocol::connection::ConnectionState;
pub use crate::protocol::driver::{TransportDriver, TransportEvent};
pub use crate::protocol::event_queue::EventType;
pub use crate::transport::{DatagramChannel, LocalChannel, LocalRegistry, UdpChannel};
