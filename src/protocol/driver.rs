//! # Transport Driver
//!
//! Single-threaded, polling driver that ties the connection table, the event
//! queue and fragmentation to a [`DatagramChannel`].
//!
//! ## Update Cycle
//! ```text
//! update()
//!   1. release slots destroyed during the previous cycle
//!   2. reset the event queue and the scratch buffer
//!   3. deliver a reassembled packet carried over from the previous cycle
//!   4. timeout sweep: retry or fail handshakes, drop idle peers
//!   5. receive until the channel would block or the scratch buffer is full
//! ```
//!
//! Data events reference bytes in the scratch buffer, so everything returned
//! by [`TransportDriver::pop_event`] is only valid until the next update.
//!
//! Each connection slot owns its reassembler, so fragment ids only have to be
//! unique per sender. A reassembled packet that no longer fits behind the
//! datagrams already received this cycle is held back and delivered first
//! thing in the next update; the configured receive buffer always has room
//! for it there.
//!
//! Nothing here blocks and nothing is shared: callers on several threads
//! must confine a driver to one owner.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, IoSlice};
use std::time::Instant;

use tracing::{debug, instrument, trace, warn};

use crate::config::TransportConfig;
use crate::core::bit_buffer::BitBuffer;
use crate::core::endpoint::Endpoint;
use crate::core::handle::ConnectionHandle;
use crate::core::packet::{PacketHeader, PacketType, PACKET_HEADER_SIZE};
use crate::error::{Result, TransportError};
use crate::protocol::connection::{
    ConnectionState, ConnectionTable, TimeoutAction, TimeoutPolicy,
};
use crate::protocol::event_queue::{Event, EventQueue, EventType};
use crate::protocol::fragment::{Fragment, Fragmenter, Reassembler, FRAGMENT_HEADER_SIZE};
use crate::transport::DatagramChannel;
use crate::utils::metrics::Metrics;
use crate::utils::time::{Clock, SystemClock};

/// Event handed to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportEvent<'a> {
    pub handle: ConnectionHandle,
    pub kind: EventType,
    /// Payload of a `Data` event, empty otherwise
    pub data: &'a [u8],
}

/// Connection-oriented transport over an unreliable datagram channel
pub struct TransportDriver<C> {
    channel: C,
    config: TransportConfig,
    policy: TimeoutPolicy,
    clock: Box<dyn Clock>,
    connections: ConnectionTable,
    events: EventQueue,
    pending_accepts: VecDeque<ConnectionHandle>,
    scratch: BitBuffer,
    fragmenter: Fragmenter,
    reassemblers: Vec<Reassembler>,
    carried_over: Option<(ConnectionHandle, Vec<u8>)>,
    fragment_header: BitBuffer,
    next_fragment_id: u16,
    listening: bool,
    metrics: Metrics,
}

impl<C: DatagramChannel> TransportDriver<C> {
    /// Driver on the system clock
    pub fn new(channel: C, config: TransportConfig) -> Result<Self> {
        Self::with_clock(channel, config, SystemClock)
    }

    /// Driver reading time from `clock`
    pub fn with_clock<K>(channel: C, config: TransportConfig, clock: K) -> Result<Self>
    where
        K: Clock + 'static,
    {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(TransportError::ConfigError(format!(
                "Invalid transport configuration: {}",
                errors.join("; ")
            )));
        }
        let capacity = u16::try_from(config.max_connections).map_err(|_| {
            TransportError::ConfigError(format!(
                "Max connections too large: {}",
                config.max_connections
            ))
        })?;
        let fragment_size = config.fragment_size();

        Ok(Self {
            channel,
            policy: TimeoutPolicy::from(&config),
            clock: Box::new(clock),
            connections: ConnectionTable::new(capacity),
            events: EventQueue::new(config.max_connections, config.max_events_per_connection),
            pending_accepts: VecDeque::with_capacity(config.max_connections),
            scratch: BitBuffer::new(config.receive_buffer_size),
            fragmenter: Fragmenter::new(fragment_size),
            reassemblers: (0..config.max_connections)
                .map(|_| Reassembler::new(fragment_size, config.max_in_flight_fragments))
                .collect(),
            carried_over: None,
            fragment_header: BitBuffer::new(FRAGMENT_HEADER_SIZE),
            next_fragment_id: 0,
            listening: false,
            metrics: Metrics::new(),
            config,
        })
    }

    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub fn bind(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.channel.bind(endpoint)?;
        debug!("Driver bound");
        Ok(())
    }

    /// Start accepting inbound connection requests
    pub fn listen(&mut self) {
        if !self.listening {
            debug!(endpoint = ?self.channel.local_endpoint(), "Listening for connections");
        }
        self.listening = true;
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.channel.local_endpoint()
    }

    /// Start a handshake with `endpoint`.
    ///
    /// Returns immediately; the `Connect` event arrives through a later
    /// update. Connecting to an endpoint that already has a live connection
    /// returns that connection's handle.
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub fn connect(&mut self, endpoint: Endpoint) -> Result<ConnectionHandle> {
        let local = self
            .channel
            .local_endpoint()
            .ok_or(TransportError::NotBound)?;
        endpoint.ensure(local.family())?;

        if let Some(existing) = self.connections.find_by_endpoint(&endpoint) {
            debug!(handle = %existing, "Endpoint already has a connection");
            return Ok(existing);
        }

        let now = self.clock.now();
        let handle = self
            .connections
            .open(endpoint, ConnectionState::Connecting, now)
            .ok_or(TransportError::ConnectionTableFull)?;
        self.metrics.handshake_attempt();
        self.send_control(PacketType::ConnectionRequest, &endpoint);
        debug!(handle = %handle, "Connection request sent");
        Ok(handle)
    }

    /// Next connection accepted by the listener, if any
    pub fn accept(&mut self) -> Option<ConnectionHandle> {
        while let Some(handle) = self.pending_accepts.pop_front() {
            if self.connections.get(handle).is_some() {
                return Some(handle);
            }
            trace!(handle = %handle, "Accepted connection already closed");
        }
        None
    }

    /// Close a connection, notifying the peer. Stale handles are ignored.
    #[instrument(skip(self), fields(handle = %handle))]
    pub fn disconnect(&mut self, handle: ConnectionHandle) -> Result<()> {
        let Some(record) = self.connections.get(handle) else {
            trace!("Disconnect on stale handle ignored");
            return Ok(());
        };
        let endpoint = record.endpoint;
        let state = record.state;

        self.send_control(PacketType::Disconnect, &endpoint);
        self.close(handle, state);
        debug!(endpoint = %endpoint, %state, "Connection closed locally");
        Ok(())
    }

    /// Send the bytes written to `payload`.
    ///
    /// Payloads that do not fit one datagram are fragmented. Returns the
    /// number of bytes handed to the channel, headers included, or 0 for a
    /// stale handle, a failed send or a payload above
    /// [`TransportConfig::max_packet_size`]. Peers are expected to share the
    /// transport configuration, so that limit is also what the receiving
    /// side can reassemble.
    pub fn send(&mut self, handle: ConnectionHandle, payload: &BitBuffer) -> usize {
        let bytes = payload.as_bytes();
        let limit = self.config.max_packet_size();
        if bytes.len() > limit {
            warn!(handle = %handle, len = bytes.len(), limit, "Payload too large to send");
            self.metrics.protocol_error();
            return 0;
        }

        let now = self.clock.now();
        let Some(record) = self.connections.get_mut(handle) else {
            trace!(handle = %handle, "Send on stale handle ignored");
            return 0;
        };
        record.touch(now);
        let dest = record.endpoint;

        if bytes.len() <= self.config.max_unfragmented_payload() {
            let header = PacketHeader::new(PacketType::Data).to_bytes();
            self.transmit(&[IoSlice::new(&header), IoSlice::new(bytes)], &dest)
        } else {
            self.send_fragmented(bytes, &dest)
        }
    }

    /// Next event in arrival order across all connections
    pub fn pop_event(&mut self) -> Option<TransportEvent<'_>> {
        let event = self.events.pop_global()?;
        Some(self.materialize(event))
    }

    /// Next event for one connection
    pub fn pop_event_for(&mut self, handle: ConnectionHandle) -> Option<TransportEvent<'_>> {
        if !self.connections.is_current(handle) {
            return None;
        }
        let event = self.events.pop_for_connection(handle.slot())?;
        Some(self.materialize(event))
    }

    /// Run one cycle: release, reset, deliver carried-over data, sweep
    /// timeouts, then drain the channel.
    ///
    /// Only channel failures other than would-block are returned.
    #[instrument(skip(self), level = "trace")]
    pub fn update(&mut self) -> Result<()> {
        if self.channel.local_endpoint().is_none() {
            return Err(TransportError::NotBound);
        }

        let released = self.connections.release_destroyed();
        if released > 0 {
            trace!(released, "Released destroyed slots");
        }
        self.events.reset();
        self.scratch.reset();
        self.deliver_carried_over();

        let now = self.clock.now();
        self.sweep_timeouts(now);
        self.receive_all(now)
    }

    /// Current state of a connection, `Destroyed` until its slot is reused
    pub fn state(&self, handle: ConnectionHandle) -> Option<ConnectionState> {
        self.connections.state(handle)
    }

    pub fn remote_endpoint(&self, handle: ConnectionHandle) -> Option<Endpoint> {
        self.connections.get(handle).map(|record| record.endpoint)
    }

    /// Live connections in any state
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Undrained events
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn materialize(&self, event: Event) -> TransportEvent<'_> {
        let data = match event.kind {
            EventType::Data => {
                let data = self.scratch.bytes(event.offset, event.length);
                debug_assert!(data.is_some(), "data event outside the scratch buffer");
                data.unwrap_or_else(|| {
                    warn!(
                        handle = %event.connection,
                        offset = event.offset,
                        len = event.length,
                        "Data event outside the scratch buffer"
                    );
                    &[]
                })
            }
            EventType::Connect | EventType::Disconnect => &[],
        };
        TransportEvent {
            handle: event.connection,
            kind: event.kind,
            data,
        }
    }

    /// Write a packet held back by the previous cycle into the fresh scratch
    fn deliver_carried_over(&mut self) {
        let Some((handle, payload)) = self.carried_over.take() else {
            return;
        };
        if self.connections.get(handle).is_none() {
            debug!(handle = %handle, len = payload.len(), "Carried-over packet dropped, connection closed");
            self.metrics.event_dropped();
            return;
        }
        if let Err(e) = self.scratch.write_bytes(&payload) {
            warn!(handle = %handle, len = payload.len(), error = %e, "Carried-over packet does not fit");
            self.metrics.event_dropped();
            return;
        }
        self.metrics.packet_reassembled();
        if !self.push_event(Event::data(handle, 0, payload.len())) {
            self.scratch.reset();
        }
    }

    fn sweep_timeouts(&mut self, now: Instant) {
        for slot in 0..self.connections.capacity() as u16 {
            let Some(record) = self.connections.slot_mut(slot) else {
                continue;
            };
            let handle = record.handle;
            let endpoint = record.endpoint;
            let state = record.state;
            let attempts = record.attempts;

            match record.poll_timeout(now, &self.policy) {
                TimeoutAction::None => {}
                TimeoutAction::Retry(packet_type) => {
                    debug!(
                        handle = %handle,
                        endpoint = %endpoint,
                        attempt = attempts + 1,
                        ?packet_type,
                        "Handshake timed out, retrying"
                    );
                    self.metrics.handshake_retry();
                    self.send_control(packet_type, &endpoint);
                }
                TimeoutAction::Fail => {
                    warn!(
                        handle = %handle,
                        endpoint = %endpoint,
                        attempts,
                        "Handshake failed after final attempt"
                    );
                    self.metrics.handshake_failed();
                    self.close(handle, state);
                }
                TimeoutAction::IdleDisconnect => {
                    warn!(handle = %handle, endpoint = %endpoint, "Connection idle, disconnecting");
                    self.metrics.idle_timeout();
                    self.send_control(PacketType::Disconnect, &endpoint);
                    self.close(handle, state);
                }
            }
        }
    }

    fn receive_all(&mut self, now: Instant) -> Result<()> {
        let mtu = self.config.mtu;
        loop {
            if self.carried_over.is_some() {
                trace!("Scratch buffer full of reassembled data, deferring receive");
                return Ok(());
            }
            self.scratch.write_align();
            let start = self.scratch.bytes_written();
            let spare = self.scratch.spare_capacity_mut();
            if spare.len() < mtu {
                trace!(used = start, "Scratch buffer full, deferring receive");
                return Ok(());
            }

            let (len, source) = match self.channel.receive_message(&mut spare[..mtu]) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.scratch.commit_bytes(len)?;
            self.metrics.packet_received(len as u64);
            self.dispatch(start, len, source, now);
        }
    }

    /// Route one datagram sitting at `start..start + len` in the scratch buffer
    fn dispatch(&mut self, start: usize, len: usize, source: Endpoint, now: Instant) {
        let header = self
            .scratch
            .bytes(start, len)
            .ok_or(TransportError::InvalidHeader)
            .and_then(PacketHeader::from_bytes);
        let packet_type = match header {
            Ok(header) => header.packet_type,
            Err(e) => {
                debug!(source = %source, len, error = %e, "Discarding malformed datagram");
                self.metrics.protocol_error();
                self.scratch.truncate(start);
                return;
            }
        };
        trace!(source = %source, ?packet_type, len, "Datagram received");

        if !packet_type.carries_payload() {
            self.scratch.truncate(start);
        }
        match packet_type {
            PacketType::ConnectionRequest => self.on_connection_request(source, now),
            PacketType::ConnectionAccept => self.on_connection_accept(source, now),
            PacketType::ConnectionReject => {
                warn!(source = %source, "Connection request rejected by peer");
                self.metrics.connection_rejected();
            }
            PacketType::Disconnect => self.on_disconnect(source),
            PacketType::Data => self.on_data(start, len, source, now),
            PacketType::Fragment => self.on_fragment(start, len, source, now),
        }
    }

    fn on_connection_request(&mut self, source: Endpoint, now: Instant) {
        if !self.listening {
            trace!(source = %source, "Not listening, connection request ignored");
            return;
        }

        if let Some(handle) = self.connections.find_by_endpoint(&source) {
            let Some(record) = self.connections.get_mut(handle) else {
                return;
            };
            record.on_duplicate_request(now);
            // Both sides connecting at once: the request doubles as an accept
            if record.on_accept(now) {
                self.metrics.handshake_success();
                self.connection_established(handle);
            }
            debug!(handle = %handle, source = %source, "Repeated connection request");
            self.send_control(PacketType::ConnectionAccept, &source);
            return;
        }

        match self
            .connections
            .open(source, ConnectionState::Connected, now)
        {
            Some(handle) => {
                debug!(handle = %handle, source = %source, "Connection accepted");
                self.connection_established(handle);
                if self.pending_accepts.len() >= self.connections.capacity() {
                    self.pending_accepts.pop_front();
                }
                self.pending_accepts.push_back(handle);
                self.send_control(PacketType::ConnectionAccept, &source);
            }
            None => {
                warn!(source = %source, "Connection table full, rejecting request");
                self.metrics.connection_rejected();
                self.send_control(PacketType::ConnectionReject, &source);
            }
        }
    }

    fn on_connection_accept(&mut self, source: Endpoint, now: Instant) {
        let Some(handle) = self.connections.find_by_endpoint(&source) else {
            trace!(source = %source, "Accept from unknown endpoint ignored");
            return;
        };
        let completed = self
            .connections
            .get_mut(handle)
            .is_some_and(|record| record.on_accept(now));
        if completed {
            debug!(handle = %handle, source = %source, "Handshake complete");
            self.metrics.handshake_success();
            self.connection_established(handle);
        }
    }

    fn on_disconnect(&mut self, source: Endpoint) {
        let Some(handle) = self.connections.find_by_endpoint(&source) else {
            trace!(source = %source, "Disconnect from unknown endpoint ignored");
            return;
        };
        let state = self.connections.state(handle).unwrap_or_default();
        debug!(handle = %handle, source = %source, "Peer disconnected");
        self.close(handle, state);
    }

    fn on_data(&mut self, start: usize, len: usize, source: Endpoint, now: Instant) {
        let Some(handle) = self.admit_payload(&source, now) else {
            self.scratch.truncate(start);
            return;
        };
        let event = Event::data(
            handle,
            start + PACKET_HEADER_SIZE,
            len - PACKET_HEADER_SIZE,
        );
        if !self.push_event(event) {
            self.scratch.truncate(start);
        }
    }

    fn on_fragment(&mut self, start: usize, len: usize, source: Endpoint, now: Instant) {
        let Some(handle) = self.admit_payload(&source, now) else {
            self.scratch.truncate(start);
            return;
        };
        self.metrics.fragment_received();

        let fragment = self
            .scratch
            .slice(start + PACKET_HEADER_SIZE, len - PACKET_HEADER_SIZE)
            .and_then(|mut slice| Fragment::read(&mut slice));
        let fragment = match fragment {
            Ok(fragment) => fragment,
            Err(e) => {
                debug!(handle = %handle, error = %e, "Discarding malformed fragment");
                self.metrics.protocol_error();
                self.scratch.truncate(start);
                return;
            }
        };

        let slot = handle.slot() as usize;
        let Some(reassembler) = self.reassemblers.get_mut(slot) else {
            self.scratch.truncate(start);
            return;
        };
        let evictions = reassembler.evictions();
        let kept = match reassembler.reassemble(&fragment) {
            Ok(Some(complete)) => {
                // The reassembled payload replaces the fragment in place
                self.scratch.truncate(start);
                match self.scratch.write_bytes(complete) {
                    Ok(()) => true,
                    Err(_) => {
                        trace!(
                            handle = %handle,
                            len = complete.len(),
                            "Reassembled payload held for the next update"
                        );
                        self.carried_over = Some((handle, complete.to_vec()));
                        false
                    }
                }
            }
            Ok(None) => false,
            Err(e) => {
                debug!(handle = %handle, error = %e, "Discarding malformed fragment");
                self.metrics.protocol_error();
                false
            }
        };

        let evicted = self.reassemblers[slot].evictions() - evictions;
        if evicted > 0 {
            self.metrics.reassembly_eviction(evicted);
        }
        if !kept {
            self.scratch.truncate(start);
            return;
        }

        self.metrics.packet_reassembled();
        let length = self.scratch.bytes_written() - start;
        if !self.push_event(Event::data(handle, start, length)) {
            self.scratch.truncate(start);
        }
    }

    /// Connection a payload from `source` belongs to.
    ///
    /// A payload reaching a connection still handshaking stands in for the
    /// lost accept and promotes it.
    fn admit_payload(&mut self, source: &Endpoint, now: Instant) -> Option<ConnectionHandle> {
        let Some(handle) = self.connections.find_by_endpoint(source) else {
            trace!(source = %source, "Payload from unknown endpoint dropped");
            return None;
        };
        let promoted = self.connections.get_mut(handle)?.on_data(now);
        if promoted {
            debug!(handle = %handle, "Payload before accept, treating as accepted");
            self.metrics.handshake_success();
            self.connection_established(handle);
        }
        Some(handle)
    }

    fn connection_established(&mut self, handle: ConnectionHandle) {
        self.metrics.connection_established();
        self.push_event(Event::connect(handle));
    }

    /// Destroy the connection and queue its `Disconnect` event
    fn close(&mut self, handle: ConnectionHandle, state: ConnectionState) {
        if !self.connections.destroy(handle) {
            return;
        }
        if let Some(reassembler) = self.reassemblers.get_mut(handle.slot() as usize) {
            let discarded = reassembler.clear();
            if discarded > 0 {
                debug!(handle = %handle, discarded, "Partial packets discarded with connection");
            }
        }
        if state == ConnectionState::Connected {
            self.metrics.connection_closed();
        }
        self.push_event(Event::disconnect(handle));
    }

    fn push_event(&mut self, event: Event) -> bool {
        match self.events.push(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    handle = %event.connection,
                    kind = ?event.kind,
                    error = %e,
                    "Event dropped"
                );
                self.metrics.event_dropped();
                false
            }
        }
    }

    fn send_fragmented(&mut self, payload: &[u8], dest: &Endpoint) -> usize {
        let id = self.next_fragment_id;
        let fragments = match self.fragmenter.fragment(payload, id) {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!(dest = %dest, len = payload.len(), error = %e, "Payload too large to send");
                self.metrics.protocol_error();
                return 0;
            }
        };
        self.next_fragment_id = id.wrapping_add(1);
        trace!(dest = %dest, id, count = fragments.len(), "Sending fragmented payload");

        let header = PacketHeader::new(PacketType::Fragment).to_bytes();
        let mut total = 0;
        for fragment in fragments {
            self.fragment_header.reset();
            if let Err(e) = fragment.write_header(&mut self.fragment_header) {
                warn!(id, error = %e, "Failed to encode fragment header");
                return total;
            }
            let bufs = [
                IoSlice::new(&header),
                IoSlice::new(self.fragment_header.as_bytes()),
                IoSlice::new(fragment.payload),
            ];
            match self.channel.send_message(&bufs, dest) {
                Ok(sent) => {
                    self.metrics.packet_sent(sent as u64);
                    self.metrics.fragment_sent();
                    total += sent;
                }
                Err(e) => {
                    warn!(dest = %dest, id, error = %e, "Fragment send failed");
                    return total;
                }
            }
        }
        total
    }

    fn send_control(&mut self, packet_type: PacketType, dest: &Endpoint) {
        let header = PacketHeader::new(packet_type).to_bytes();
        self.transmit(&[IoSlice::new(&header)], dest);
    }

    fn transmit(&mut self, bufs: &[IoSlice<'_>], dest: &Endpoint) -> usize {
        match self.channel.send_message(bufs, dest) {
            Ok(sent) => {
                self.metrics.packet_sent(sent as u64);
                sent
            }
            Err(e) => {
                warn!(dest = %dest, error = %e, "Datagram send failed");
                0
            }
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for TransportDriver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportDriver")
            .field("channel", &self.channel)
            .field("listening", &self.listening)
            .field("connections", &self.connections.len())
            .field("pending_events", &self.events.len())
            .finish_non_exhaustive()
    }
}
