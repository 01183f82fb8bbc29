//! In-process datagram channel.
//!
//! A [`LocalRegistry`] maps in-process endpoints to bounded mailboxes. It is
//! an ordinary value: every channel created from the same registry (or a clone
//! of it) can reach the others, while separate registries are fully isolated,
//! so independent tests can run side by side.
//!
//! Each mailbox is a fixed-size FIFO. When it is full, the oldest unread
//! datagram is dropped to make room, mirroring a lossy network.

use std::collections::{HashMap, VecDeque};
use std::io::{self, IoSlice};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, instrument, trace};

use crate::core::endpoint::{Endpoint, TransportFamily};
use crate::error::{constants, Result, TransportError};
use crate::transport::{gathered_len, DatagramChannel};

/// Default number of datagrams buffered per endpoint
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Mailbox {
    queue: VecDeque<(Endpoint, Bytes)>,
    dropped: u64,
}

#[derive(Debug)]
struct RegistryInner {
    mailboxes: HashMap<Endpoint, Mailbox>,
    capacity: usize,
}

/// Shared table of in-process mailboxes
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl LocalRegistry {
    /// Registry whose mailboxes hold up to `mailbox_capacity` datagrams
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                mailboxes: HashMap::new(),
                capacity: mailbox_capacity.max(1),
            })),
        }
    }

    /// Unbound channel attached to this registry
    pub fn channel(&self) -> LocalChannel {
        LocalChannel {
            registry: self.clone(),
            local: None,
            outgoing: BytesMut::new(),
        }
    }

    pub fn is_registered(&self, endpoint: &Endpoint) -> bool {
        self.lock()
            .map(|inner| inner.mailboxes.contains_key(endpoint))
            .unwrap_or(false)
    }

    /// Datagrams waiting in `endpoint`'s mailbox
    pub fn pending(&self, endpoint: &Endpoint) -> usize {
        self.lock()
            .ok()
            .and_then(|inner| inner.mailboxes.get(endpoint).map(|m| m.queue.len()))
            .unwrap_or(0)
    }

    /// Datagrams discarded from `endpoint`'s mailbox by overflow
    pub fn dropped(&self, endpoint: &Endpoint) -> u64 {
        self.lock()
            .ok()
            .and_then(|inner| inner.mailboxes.get(endpoint).map(|m| m.dropped))
            .unwrap_or(0)
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, RegistryInner>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other(constants::ERR_LOCK_POISONED))
    }

    fn register(&self, endpoint: Endpoint) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.mailboxes.contains_key(&endpoint) {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                constants::ERR_ADDRESS_IN_USE,
            )));
        }
        inner.mailboxes.insert(endpoint, Mailbox::default());
        Ok(())
    }

    fn unregister(&self, endpoint: &Endpoint) {
        if let Ok(mut inner) = self.lock() {
            inner.mailboxes.remove(endpoint);
        }
    }

    fn deliver(&self, source: Endpoint, dest: &Endpoint, datagram: Bytes) -> io::Result<()> {
        let mut inner = self.lock()?;
        let capacity = inner.capacity;
        let Some(mailbox) = inner.mailboxes.get_mut(dest) else {
            trace!(dest = %dest, "No mailbox for destination, datagram lost");
            return Ok(());
        };
        if mailbox.queue.len() >= capacity {
            mailbox.queue.pop_front();
            mailbox.dropped += 1;
            debug!(dest = %dest, "Mailbox full, dropped oldest datagram");
        }
        mailbox.queue.push_back((source, datagram));
        Ok(())
    }

    fn take(&self, endpoint: &Endpoint) -> io::Result<Option<(Endpoint, Bytes)>> {
        let mut inner = self.lock()?;
        Ok(inner
            .mailboxes
            .get_mut(endpoint)
            .and_then(|mailbox| mailbox.queue.pop_front()))
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}

/// Channel endpoint backed by a [`LocalRegistry`] mailbox
#[derive(Debug)]
pub struct LocalChannel {
    registry: LocalRegistry,
    local: Option<Endpoint>,
    outgoing: BytesMut,
}

impl LocalChannel {
    fn bound(&self) -> io::Result<Endpoint> {
        self.local
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, constants::ERR_NOT_BOUND))
    }
}

impl DatagramChannel for LocalChannel {
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    fn bind(&mut self, endpoint: &Endpoint) -> Result<()> {
        endpoint.ensure(TransportFamily::Local)?;
        if self.local.is_some() {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                constants::ERR_ALREADY_BOUND,
            )));
        }
        self.registry.register(*endpoint)?;
        self.local = Some(*endpoint);
        debug!("Local channel bound");
        Ok(())
    }

    fn send_message(&mut self, bufs: &[IoSlice<'_>], dest: &Endpoint) -> io::Result<usize> {
        let source = self.bound()?;
        if dest.ensure(TransportFamily::Local).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                constants::ERR_WRONG_FAMILY,
            ));
        }

        let len = gathered_len(bufs);
        self.outgoing.reserve(len);
        for buf in bufs {
            self.outgoing.put_slice(buf);
        }
        let datagram = self.outgoing.split().freeze();
        self.registry.deliver(source, dest, datagram)?;
        Ok(len)
    }

    fn receive_message(&mut self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        let local = self.bound()?;
        match self.registry.take(&local)? {
            Some((source, datagram)) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok((len, source))
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        self.local
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        if let Some(endpoint) = self.local.take() {
            self.registry.unregister(&endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(registry: &LocalRegistry, handle: u32) -> LocalChannel {
        let mut channel = registry.channel();
        channel.bind(&Endpoint::local(handle, 1)).unwrap();
        channel
    }

    #[test]
    fn test_send_and_receive() {
        let registry = LocalRegistry::default();
        let mut a = bound(&registry, 1);
        let mut b = bound(&registry, 2);

        let sent = a
            .send_message(
                &[IoSlice::new(b"head"), IoSlice::new(b"-tail")],
                &Endpoint::local(2, 1),
            )
            .unwrap();
        assert_eq!(sent, 9);

        let mut buf = [0u8; 32];
        let (len, source) = b.receive_message(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"head-tail");
        assert_eq!(source, Endpoint::local(1, 1));

        let err = b.receive_message(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_duplicate_bind_rejected() {
        let registry = LocalRegistry::default();
        let _a = bound(&registry, 1);
        let mut other = registry.channel();
        match other.bind(&Endpoint::local(1, 1)) {
            Err(TransportError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::AddrInUse),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_bind_rejected() {
        let registry = LocalRegistry::default();
        let mut channel = registry.channel();
        assert!(channel.bind(&Endpoint::local(1, 0)).is_err());
        assert!(channel
            .bind(&Endpoint::udp(std::net::Ipv4Addr::LOCALHOST, 9))
            .is_err());
    }

    #[test]
    fn test_unbound_channel_errors() {
        let registry = LocalRegistry::default();
        let mut channel = registry.channel();
        let mut buf = [0u8; 4];
        assert_eq!(
            channel.receive_message(&mut buf).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert_eq!(
            channel
                .send_message(&[IoSlice::new(b"x")], &Endpoint::local(2, 1))
                .unwrap_err()
                .kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let registry = LocalRegistry::new(2);
        let mut a = bound(&registry, 1);
        let mut b = bound(&registry, 2);
        let dest = Endpoint::local(2, 1);
        for byte in [1u8, 2, 3] {
            a.send_message(&[IoSlice::new(&[byte])], &dest).unwrap();
        }
        assert_eq!(registry.pending(&dest), 2);
        assert_eq!(registry.dropped(&dest), 1);

        let mut buf = [0u8; 1];
        b.receive_message(&mut buf).unwrap();
        assert_eq!(buf[0], 2);
        b.receive_message(&mut buf).unwrap();
        assert_eq!(buf[0], 3);
    }

    #[test]
    fn test_truncates_to_receive_buffer() {
        let registry = LocalRegistry::default();
        let mut a = bound(&registry, 1);
        let mut b = bound(&registry, 2);
        a.send_message(&[IoSlice::new(b"abcdef")], &Endpoint::local(2, 1))
            .unwrap();
        let mut buf = [0u8; 3];
        let (len, _) = b.receive_message(&mut buf).unwrap();
        assert_eq!(len, 3);
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = LocalRegistry::default();
        {
            let _a = bound(&registry, 5);
            assert!(registry.is_registered(&Endpoint::local(5, 1)));
        }
        assert!(!registry.is_registered(&Endpoint::local(5, 1)));
        let _again = bound(&registry, 5);
    }

    #[test]
    fn test_registries_are_isolated() {
        let first = LocalRegistry::default();
        let second = LocalRegistry::default();
        let mut a = bound(&first, 1);
        let mut b = bound(&second, 2);
        a.send_message(&[IoSlice::new(b"x")], &Endpoint::local(2, 1))
            .unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            b.receive_message(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }
}
