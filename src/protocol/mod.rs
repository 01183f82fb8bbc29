//! # Protocol Layer
//!
//! Connection semantics layered over raw datagrams.
//!
//! ## Components
//! - **Event Queue**: Per-connection event rings with a global arrival order
//! - **Fragment**: Splitting and reassembly of payloads larger than one datagram
//! - **Connection**: Handshake state machine and the fixed-capacity connection table
//! - **Driver**: The polling `update()` loop that ties everything to a channel
//!
//! ## Handshake
//! ```text
//! connector                         listener
//!   Connecting ──ConnectionRequest──▶ (slot acquired, Connected)
//!   Connected  ◀──ConnectionAccept───
//! ```
//! Requests are retried until `max_connect_attempts` is exhausted, at which
//! point the application sees an ordinary `Disconnect` event.

pub mod connection;
pub mod driver;
pub mod event_queue;
pub mod fragment;
