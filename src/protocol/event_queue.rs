//! Per-connection event queues with a global arrival order.
//!
//! Each connection slot owns a bounded ring of events. A master FIFO of
//! `(slot, index)` markers records the order events were pushed across all
//! connections, so [`EventQueue::pop_global`] drains fairly in arrival
//! order while [`EventQueue::pop_for_connection`] lets a caller consume one
//! connection independently. Markers whose event was already consumed
//! directly are skipped as stale.
//!
//! Data events only carry an offset/length into the driver's scratch buffer;
//! the queue owns no payload bytes.

use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::core::handle::ConnectionHandle;
use crate::error::{Result, TransportError};

/// Kind of event delivered to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Connect,
    Disconnect,
    Data,
}

/// Event record; for `Data`, `offset`/`length` index the scratch buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventType,
    pub connection: ConnectionHandle,
    pub offset: usize,
    pub length: usize,
}

impl Event {
    pub fn connect(connection: ConnectionHandle) -> Self {
        Self {
            kind: EventType::Connect,
            connection,
            offset: 0,
            length: 0,
        }
    }

    pub fn disconnect(connection: ConnectionHandle) -> Self {
        Self {
            kind: EventType::Disconnect,
            connection,
            offset: 0,
            length: 0,
        }
    }

    pub fn data(connection: ConnectionHandle, offset: usize, length: usize) -> Self {
        Self {
            kind: EventType::Data,
            connection,
            offset,
            length,
        }
    }
}

#[derive(Debug)]
struct ConnectionQueue {
    ring: Vec<Option<Event>>,
    /// Monotonic index of the next event to pop
    head: usize,
    /// Monotonic index of the next free position
    tail: usize,
}

impl ConnectionQueue {
    fn new(capacity: usize) -> Self {
        Self {
            ring: vec![None; capacity],
            head: 0,
            tail: 0,
        }
    }

    fn len(&self) -> usize {
        self.tail - self.head
    }

    fn is_full(&self) -> bool {
        self.len() == self.ring.len()
    }

    fn push(&mut self, event: Event) -> usize {
        let index = self.tail;
        let capacity = self.ring.len();
        self.ring[index % capacity] = Some(event);
        self.tail += 1;
        index
    }

    fn pop(&mut self) -> Option<Event> {
        if self.head == self.tail {
            return None;
        }
        let capacity = self.ring.len();
        let event = self.ring[self.head % capacity].take();
        self.head += 1;
        event
    }

    fn clear(&mut self) {
        self.ring.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.tail = 0;
    }
}

/// Bounded per-connection event rings plus a global ordering FIFO
#[derive(Debug)]
pub struct EventQueue {
    queues: Vec<ConnectionQueue>,
    order: VecDeque<(u16, usize)>,
}

impl EventQueue {
    /// `connections` slots, each holding up to `per_connection` events
    pub fn new(connections: usize, per_connection: usize) -> Self {
        let per_connection = per_connection.max(1);
        Self {
            queues: (0..connections)
                .map(|_| ConnectionQueue::new(per_connection))
                .collect(),
            order: VecDeque::with_capacity(connections * per_connection),
        }
    }

    /// Queue an event on its connection's ring.
    ///
    /// A full ring drops the event; no ordering marker is created for it.
    pub fn push(&mut self, event: Event) -> Result<()> {
        let slot = event.connection.slot();
        let queue = self
            .queues
            .get_mut(slot as usize)
            .ok_or(TransportError::EventQueueFull(slot))?;
        if queue.is_full() {
            return Err(TransportError::EventQueueFull(slot));
        }

        let index = queue.push(event);
        self.order.push_back((slot, index));
        trace!(slot, index, kind = ?event.kind, "Event queued");
        Ok(())
    }

    /// Next event in global arrival order
    pub fn pop_global(&mut self) -> Option<Event> {
        while let Some((slot, index)) = self.order.pop_front() {
            let queue = &mut self.queues[slot as usize];
            if queue.head != index || queue.head == queue.tail {
                // Already consumed through pop_for_connection
                continue;
            }
            return queue.pop();
        }
        None
    }

    /// Next event for one connection slot
    pub fn pop_for_connection(&mut self, slot: u16) -> Option<Event> {
        self.queues.get_mut(slot as usize)?.pop()
    }

    /// Number of undrained events
    pub fn len(&self) -> usize {
        self.queues.iter().map(ConnectionQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_for(&self, slot: u16) -> usize {
        self.queues
            .get(slot as usize)
            .map(ConnectionQueue::len)
            .unwrap_or(0)
    }

    /// Clear every ring and the ordering FIFO.
    ///
    /// Undrained events point into a scratch buffer that is about to be
    /// overwritten, so discarding them is logged. Returns how many were lost.
    pub fn reset(&mut self) -> usize {
        let discarded = self.len();
        if discarded > 0 {
            warn!(discarded, "Resetting event queue with undrained events");
        }
        self.queues.iter_mut().for_each(ConnectionQueue::clear);
        self.order.clear();
        discarded
    }
}
