//! Transport endpoints.
//!
//! An [`Endpoint`] names one side of a datagram exchange: a transport family,
//! a four byte address and a port. For the in-process family the address
//! bytes carry an opaque handle id instead of an IPv4 address.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::{constants, Result, TransportError};

/// Transport family an endpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportFamily {
    /// UDP over IPv4
    #[default]
    Udp,
    /// In-process channel keyed by an integer handle
    Local,
}

/// Address of a datagram peer. Equality is structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Endpoint {
    family: TransportFamily,
    address: [u8; 4],
    port: u16,
}

impl Endpoint {
    /// UDP/IPv4 endpoint
    pub fn udp(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            family: TransportFamily::Udp,
            address: ip.octets(),
            port,
        }
    }

    /// In-process endpoint; `handle` is stored in the address field
    pub fn local(handle: u32, port: u16) -> Self {
        Self {
            family: TransportFamily::Local,
            address: handle.to_le_bytes(),
            port,
        }
    }

    pub fn family(&self) -> TransportFamily {
        self.family
    }

    pub fn address(&self) -> [u8; 4] {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Opaque handle id of an in-process endpoint
    pub fn local_handle(&self) -> Option<u32> {
        match self.family {
            TransportFamily::Local => Some(u32::from_le_bytes(self.address)),
            TransportFamily::Udp => None,
        }
    }

    /// Port 0 is reserved, so a default endpoint is never valid.
    pub fn is_valid(&self) -> bool {
        self.port != 0
    }

    /// Validate the endpoint and check that it belongs to `family`.
    pub fn ensure(&self, family: TransportFamily) -> Result<()> {
        if !self.is_valid() {
            return Err(TransportError::InvalidEndpoint(constants::ERR_ZERO_PORT));
        }
        if self.family != family {
            return Err(TransportError::InvalidEndpoint(constants::ERR_WRONG_FAMILY));
        }
        Ok(())
    }

    /// Socket address for a UDP endpoint
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self.family {
            TransportFamily::Udp => Some(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(self.address),
                self.port,
            ))),
            TransportFamily::Local => None,
        }
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Endpoint::udp(*addr.ip(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            TransportFamily::Udp => write!(f, "{}:{}", Ipv4Addr::from(self.address), self.port),
            TransportFamily::Local => write!(
                f,
                "local://{}:{}",
                u32::from_le_bytes(self.address),
                self.port
            ),
        }
    }
}
