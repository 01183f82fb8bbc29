//! UDP datagram channel.
//!
//! Wraps a standard-library socket switched to non-blocking mode. Only IPv4
//! is carried; datagrams arriving from IPv6 sources are discarded.

use std::io::{self, IoSlice};
use std::net::{SocketAddr, UdpSocket};

use tracing::{debug, instrument, trace};

use crate::core::endpoint::{Endpoint, TransportFamily};
use crate::error::{constants, Result, TransportError};
use crate::transport::{gathered_len, DatagramChannel};

/// IPv4 UDP socket
#[derive(Debug, Default)]
pub struct UdpChannel {
    socket: Option<UdpSocket>,
    local: Option<Endpoint>,
    gather: Vec<u8>,
}

impl UdpChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, constants::ERR_NOT_BOUND))
    }
}

impl DatagramChannel for UdpChannel {
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    fn bind(&mut self, endpoint: &Endpoint) -> Result<()> {
        endpoint.ensure(TransportFamily::Udp)?;
        if self.socket.is_some() {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                constants::ERR_ALREADY_BOUND,
            )));
        }

        let addr = endpoint
            .to_socket_addr()
            .ok_or(TransportError::InvalidEndpoint(constants::ERR_WRONG_FAMILY))?;
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local = match socket.local_addr()? {
            SocketAddr::V4(addr) => Endpoint::from(addr),
            SocketAddr::V6(_) => return Err(TransportError::InvalidEndpoint(constants::ERR_WRONG_FAMILY)),
        };

        debug!(bound = %local, "UDP channel bound");
        self.socket = Some(socket);
        self.local = Some(local);
        Ok(())
    }

    fn send_message(&mut self, bufs: &[IoSlice<'_>], dest: &Endpoint) -> io::Result<usize> {
        let addr = match (dest.ensure(TransportFamily::Udp), dest.to_socket_addr()) {
            (Ok(()), Some(addr)) => addr,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    constants::ERR_WRONG_FAMILY,
                ))
            }
        };
        let socket = self.socket.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, constants::ERR_NOT_BOUND)
        })?;

        self.gather.clear();
        self.gather.reserve(gathered_len(bufs));
        for buf in bufs {
            self.gather.extend_from_slice(buf);
        }
        socket.send_to(&self.gather, addr)
    }

    fn receive_message(&mut self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        let socket = self.socket()?;
        loop {
            let (len, source) = socket.recv_from(buf)?;
            match source {
                SocketAddr::V4(addr) => return Ok((len, Endpoint::from(addr))),
                SocketAddr::V6(addr) => {
                    trace!(source = %addr, "Discarding datagram from IPv6 source");
                }
            }
        }
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        self.local
    }
}
