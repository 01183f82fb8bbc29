//! Connection state machine and the fixed-capacity connection table.
//!
//! ```text
//!  Disconnected ──connect()──▶ Connecting ──Accept / Data──▶ Connected
//!        │                        │                              │
//!        │             timeout after last attempt     Disconnect / idle
//!        │                        ▼                              ▼
//!        └──request (listener)──▶ Connected               Destroyed
//! ```
//!
//! `AwaitingResponse` is reserved for double-handshake variants; the
//! reference handshake never enters it, but the retry policy handles it.
//!
//! A destroyed record keeps its slot until [`ConnectionTable::release_destroyed`]
//! runs at the start of the next update, so events already queued for the slot
//! cannot be confused with a new peer reusing it. Lookups skip destroyed
//! records, which makes their handles stale immediately.

use std::time::{Duration, Instant};

use crate::config::TransportConfig;
use crate::core::endpoint::Endpoint;
use crate::core::handle::{ConnectionHandle, HandleTable};
use crate::core::packet::PacketType;

/// Lifecycle state of a connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Request sent, waiting for the peer's accept
    Connecting,
    /// Reserved for server-initiated double handshakes
    AwaitingResponse,
    Connected,
    /// Torn down; the slot is released on the next update
    Destroyed,
}

impl ConnectionState {
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::AwaitingResponse
        )
    }

    /// Occupies a slot and answers to its handle
    pub fn is_live(self) -> bool {
        !matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Destroyed
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Retry and timeout limits applied by the periodic sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub connect_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub max_connect_attempts: u32,
}

impl From<&TransportConfig> for TimeoutPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            disconnect_timeout: config.disconnect_timeout,
            max_connect_attempts: config.max_connect_attempts,
        }
    }
}

/// What the sweep must do for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    None,
    /// Resend this handshake packet; the attempt has been counted
    Retry(PacketType),
    /// Handshake exhausted its attempts
    Fail,
    /// Connected peer went quiet
    IdleDisconnect,
}

/// Per-slot connection state
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub handle: ConnectionHandle,
    pub endpoint: Endpoint,
    pub state: ConnectionState,
    pub attempts: u32,
    /// Last send or receive on this connection
    pub last_activity: Instant,
}

impl ConnectionRecord {
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Handshake accept received. Returns true if this completed the handshake.
    pub fn on_accept(&mut self, now: Instant) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::AwaitingResponse => {
                self.state = ConnectionState::Connected;
                self.touch(now);
                true
            }
            ConnectionState::Connected => {
                self.touch(now);
                false
            }
            _ => false,
        }
    }

    /// Payload received. Data before the accept counts as an implicit accept;
    /// returns true when that promotion happened.
    pub fn on_data(&mut self, now: Instant) -> bool {
        let promoted = self.state.is_handshaking();
        if promoted {
            self.state = ConnectionState::Connected;
        }
        self.touch(now);
        promoted
    }

    /// Retransmitted request from a peer we already know
    pub fn on_duplicate_request(&mut self, now: Instant) {
        self.attempts = self.attempts.saturating_add(1);
        self.touch(now);
    }

    /// Apply the retry/timeout policy at `now`
    pub fn poll_timeout(&mut self, now: Instant, policy: &TimeoutPolicy) -> TimeoutAction {
        let idle = now.saturating_duration_since(self.last_activity);
        match self.state {
            state if state.is_handshaking() => {
                if idle <= policy.connect_timeout {
                    return TimeoutAction::None;
                }
                if self.attempts >= policy.max_connect_attempts {
                    return TimeoutAction::Fail;
                }
                self.attempts += 1;
                self.touch(now);
                let packet = if state == ConnectionState::Connecting {
                    PacketType::ConnectionRequest
                } else {
                    PacketType::ConnectionAccept
                };
                TimeoutAction::Retry(packet)
            }
            ConnectionState::Connected if idle > policy.disconnect_timeout => {
                TimeoutAction::IdleDisconnect
            }
            _ => TimeoutAction::None,
        }
    }
}

/// Fixed-capacity table of connection records indexed by slot
#[derive(Debug)]
pub struct ConnectionTable {
    handles: HandleTable,
    records: Vec<Option<ConnectionRecord>>,
    pending_free: Vec<u16>,
}

impl ConnectionTable {
    pub fn new(capacity: u16) -> Self {
        Self {
            handles: HandleTable::new(capacity),
            records: vec![None; capacity as usize],
            pending_free: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Claim a slot for `endpoint` in `state`; `None` when the table is full
    pub fn open(
        &mut self,
        endpoint: Endpoint,
        state: ConnectionState,
        now: Instant,
    ) -> Option<ConnectionHandle> {
        let handle = self.handles.acquire()?;
        self.records[handle.slot() as usize] = Some(ConnectionRecord {
            handle,
            endpoint,
            state,
            attempts: 1,
            last_activity: now,
        });
        Some(handle)
    }

    /// Live record for a handle whose generation is current
    pub fn get(&self, handle: ConnectionHandle) -> Option<&ConnectionRecord> {
        if !self.handles.is_current(handle) {
            return None;
        }
        self.records[handle.slot() as usize]
            .as_ref()
            .filter(|record| record.state.is_live())
    }

    pub fn get_mut(&mut self, handle: ConnectionHandle) -> Option<&mut ConnectionRecord> {
        if !self.handles.is_current(handle) {
            return None;
        }
        self.records[handle.slot() as usize]
            .as_mut()
            .filter(|record| record.state.is_live())
    }

    /// Whether `handle` names the slot's current generation, live or destroyed
    pub fn is_current(&self, handle: ConnectionHandle) -> bool {
        self.handles.is_current(handle)
    }

    /// State of the record `handle` names, including `Destroyed`
    pub fn state(&self, handle: ConnectionHandle) -> Option<ConnectionState> {
        if !self.handles.is_current(handle) {
            return None;
        }
        self.records[handle.slot() as usize]
            .as_ref()
            .map(|record| record.state)
    }

    /// Live record in `slot`, regardless of generation
    pub fn slot_mut(&mut self, slot: u16) -> Option<&mut ConnectionRecord> {
        self.records
            .get_mut(slot as usize)?
            .as_mut()
            .filter(|record| record.state.is_live())
    }

    /// Linear scan for the live connection to `endpoint`
    pub fn find_by_endpoint(&self, endpoint: &Endpoint) -> Option<ConnectionHandle> {
        self.records
            .iter()
            .flatten()
            .find(|record| record.state.is_live() && record.endpoint == *endpoint)
            .map(|record| record.handle)
    }

    /// Mark the connection destroyed; its slot is released on the next
    /// [`ConnectionTable::release_destroyed`]. Returns false for stale handles.
    pub fn destroy(&mut self, handle: ConnectionHandle) -> bool {
        let Some(record) = self.get_mut(handle) else {
            return false;
        };
        record.state = ConnectionState::Destroyed;
        self.pending_free.push(handle.slot());
        true
    }

    /// Return destroyed slots to the free list, bumping their generations
    pub fn release_destroyed(&mut self) -> usize {
        let released = self.pending_free.len();
        for slot in self.pending_free.drain(..) {
            self.records[slot as usize] = None;
            self.handles.release(slot);
        }
        released
    }

    pub fn live(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.records
            .iter()
            .flatten()
            .filter(|record| record.state.is_live())
    }

    /// Number of live connections in any state
    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
