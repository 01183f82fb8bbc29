//! # Core Transport Components
//!
//! Low-level building blocks shared by the protocol layer.
//!
//! ## Components
//! - **Endpoint**: Transport family, address and port of a datagram peer
//! - **Bit Buffer**: Bit-packed write buffer and its `BitSlice` read cursor
//! - **Packet**: Fixed wire header and packet types
//! - **Handle**: Generation-tagged connection handles over a slot free list
//!
//! ## Wire Format
//! ```text
//! [Type(1)] [Reserved(1)] [Reserved(2)] [Payload(N)]
//! ```
//!
//! ## Safety
//! - Writes past a buffer's capacity are rejected, never truncated
//! - Reads are bounds-checked against the written range
//! - Stale handles are detected by generation mismatch

pub mod bit_buffer;
pub mod endpoint;
pub mod handle;
pub mod packet;
