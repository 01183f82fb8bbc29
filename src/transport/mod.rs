//! # Datagram Channels
//!
//! The transport core never touches sockets directly; it drives any
//! [`DatagramChannel`], a non-blocking send-to/receive-from capability.
//!
//! ## Providers
//! - **UDP**: IPv4 socket in non-blocking mode ([`udp::UdpChannel`])
//! - **Local**: in-process mailboxes owned by an explicit registry
//!   ([`local::LocalRegistry`], [`local::LocalChannel`])
//!
//! ## Contract
//! - `receive_message` never blocks; an empty channel reports
//!   `io::ErrorKind::WouldBlock`, which the driver treats as "no more data"
//! - Any other error is a genuine transport failure
//! - Sends are fire-and-forget; delivery is not guaranteed

use std::io::{self, IoSlice};

use crate::core::endpoint::Endpoint;
use crate::error::Result;

pub mod local;
pub mod udp;

pub use local::{LocalChannel, LocalRegistry};
pub use udp::UdpChannel;

/// Unreliable, non-blocking datagram I/O
pub trait DatagramChannel {
    /// Bind the channel to a local endpoint
    fn bind(&mut self, endpoint: &Endpoint) -> Result<()>;

    /// Send one datagram gathered from `bufs` to `dest`
    fn send_message(&mut self, bufs: &[IoSlice<'_>], dest: &Endpoint) -> io::Result<usize>;

    /// Receive one datagram into `buf`, returning its length and source.
    ///
    /// Datagrams larger than `buf` are truncated.
    fn receive_message(&mut self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)>;

    /// Endpoint the channel is bound to
    fn local_endpoint(&self) -> Option<Endpoint>;
}

impl<C: DatagramChannel + ?Sized> DatagramChannel for Box<C> {
    fn bind(&mut self, endpoint: &Endpoint) -> Result<()> {
        (**self).bind(endpoint)
    }

    fn send_message(&mut self, bufs: &[IoSlice<'_>], dest: &Endpoint) -> io::Result<usize> {
        (**self).send_message(bufs, dest)
    }

    fn receive_message(&mut self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        (**self).receive_message(buf)
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        (**self).local_endpoint()
    }
}

/// Total length of a gathered datagram
pub(crate) fn gathered_len(bufs: &[IoSlice<'_>]) -> usize {
    bufs.iter().map(|b| b.len()).sum()
}
