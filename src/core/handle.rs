//! Generation-tagged connection handles and the slot free list.
//!
//! A [`ConnectionHandle`] is `{slot, generation}`. The table stores the live
//! generation for each slot and bumps it on every release, so a handle kept
//! around after its slot was recycled no longer matches and is rejected.
//! Generation 0 is never handed out: a zeroed or default handle is always
//! invalid.

use std::collections::VecDeque;
use std::fmt;

use tracing::error;

/// Caller-visible reference to a connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionHandle {
    slot: u16,
    generation: u16,
}

impl ConnectionHandle {
    /// Handle that never matches a live slot
    pub const INVALID: ConnectionHandle = ConnectionHandle {
        slot: 0,
        generation: 0,
    };

    pub fn new(slot: u16, generation: u16) -> Self {
        Self { slot, generation }
    }

    pub fn slot(&self) -> u16 {
        self.slot
    }

    pub fn generation(&self) -> u16 {
        self.generation
    }

    /// False for handles that can never have been issued
    pub fn is_issued(&self) -> bool {
        self.generation != 0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

/// Fixed pool of slot ids with per-slot generations
#[derive(Debug)]
pub struct HandleTable {
    free: VecDeque<u16>,
    generations: Vec<u16>,
    outstanding: Vec<bool>,
}

impl HandleTable {
    /// Seed the free list with slots `0..capacity`
    pub fn new(capacity: u16) -> Self {
        Self {
            free: (0..capacity).collect(),
            generations: vec![1; capacity as usize],
            outstanding: vec![false; capacity as usize],
        }
    }

    pub fn capacity(&self) -> usize {
        self.generations.len()
    }

    /// Take the next free slot, or `None` when exhausted
    pub fn acquire(&mut self) -> Option<ConnectionHandle> {
        let slot = self.free.pop_front()?;
        self.outstanding[slot as usize] = true;
        Some(ConnectionHandle::new(slot, self.generations[slot as usize]))
    }

    /// Return a slot to the free list, invalidating every handle issued for it.
    ///
    /// Releasing a slot that is not outstanding is a programmer error.
    pub fn release(&mut self, slot: u16) {
        let index = slot as usize;
        let outstanding = self.outstanding.get(index).copied().unwrap_or(false);
        debug_assert!(outstanding, "released slot {slot} which is not outstanding");
        if !outstanding {
            error!(slot, "Released a slot that is not outstanding");
            return;
        }

        self.outstanding[index] = false;
        let next = self.generations[index].wrapping_add(1);
        self.generations[index] = if next == 0 { 1 } else { next };
        self.free.push_back(slot);
    }

    /// Whether `handle` refers to the slot's live generation
    pub fn is_current(&self, handle: ConnectionHandle) -> bool {
        let index = handle.slot as usize;
        index < self.generations.len()
            && self.outstanding[index]
            && self.generations[index] == handle.generation
    }
}
