//! # Fragmentation
//!
//! Splits payloads larger than one datagram into MTU-sized fragments and
//! reassembles them on the receiving side.
//!
//! ## Fragment Header
//! ```text
//! [Id(2)] [SequenceNumber(2, signed)] [SequenceCount(2)] [Payload(N)]
//! ```
//!
//! Every fragment but the last carries its index in `sequence_number`. The
//! last one carries `-payload_length` instead, which tells the receiver both
//! that it is terminal and how short it is. An empty payload travels as a
//! single terminal fragment with `sequence_number = 0`.
//!
//! Delivery is best-effort: there is no acknowledgment and no
//! retransmission. A reassembly slot is picked by `id % in_flight`; when a
//! new id lands on a slot still holding a partial packet, the partial packet
//! is considered lost and the slot starts over.

use tracing::{trace, warn};

use crate::core::bit_buffer::{BitBuffer, BitSlice};
use crate::error::{constants, Result, TransportError};

/// Size of the fragment header in bytes
pub const FRAGMENT_HEADER_SIZE: usize = 6;

/// Upper bound on fragments per packet (width of the arrival bitmap)
pub const MAX_FRAGMENTS_PER_PACKET: usize = 64;

/// One piece of a fragmented payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub id: u16,
    pub sequence_number: i16,
    pub sequence_count: u16,
    pub payload: &'a [u8],
}

impl<'a> Fragment<'a> {
    pub fn is_terminal(&self) -> bool {
        self.sequence_number < 0
            || (self.sequence_count > 0
                && i32::from(self.sequence_number) == i32::from(self.sequence_count) - 1
                && self.payload.is_empty())
    }

    pub fn write_header(&self, buffer: &mut BitBuffer) -> Result<()> {
        buffer.write_bits(u32::from(self.id), 16)?;
        buffer.write_short(self.sequence_number)?;
        buffer.write_bits(u32::from(self.sequence_count), 16)
    }

    /// Parse a fragment; the rest of the slice is its payload
    pub fn read(slice: &mut BitSlice<'a>) -> Result<Self> {
        let header_error = |_| TransportError::MalformedFragment(constants::ERR_FRAGMENT_LENGTH);
        let id = slice.read_bits(16).map_err(header_error)? as u16;
        let sequence_number = slice.read_short().map_err(header_error)?;
        let sequence_count = slice.read_bits(16).map_err(header_error)? as u16;
        Ok(Self {
            id,
            sequence_number,
            sequence_count,
            payload: slice.remaining_bytes(),
        })
    }
}

/// Splits payloads into fragments of a fixed size
#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    fragment_size: usize,
    max_fragments: usize,
}

impl Fragmenter {
    pub fn new(fragment_size: usize) -> Self {
        Self {
            fragment_size: fragment_size.clamp(1, i16::MAX as usize),
            max_fragments: MAX_FRAGMENTS_PER_PACKET,
        }
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Largest payload that can be fragmented
    pub fn max_packet_size(&self) -> usize {
        self.fragment_size * self.max_fragments
    }

    /// Number of fragments `len` bytes split into
    pub fn fragment_count(&self, len: usize) -> usize {
        len.div_ceil(self.fragment_size).max(1)
    }

    /// Split `payload` into fragments tagged with `id`
    pub fn fragment<'a>(&self, payload: &'a [u8], id: u16) -> Result<Fragments<'a>> {
        if payload.len() > self.max_packet_size() {
            return Err(TransportError::OversizedPacket(payload.len()));
        }
        Ok(Fragments {
            payload,
            id,
            fragment_size: self.fragment_size,
            count: self.fragment_count(payload.len()),
            next: 0,
        })
    }
}

/// Iterator over the fragments of one payload
#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    payload: &'a [u8],
    id: u16,
    fragment_size: usize,
    count: usize,
    next: usize,
}

impl<'a> Iterator for Fragments<'a> {
    type Item = Fragment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let start = index * self.fragment_size;
        let end = (start + self.fragment_size).min(self.payload.len());
        let payload = &self.payload[start..end];
        let sequence_number = if index + 1 == self.count {
            -(payload.len() as i16)
        } else {
            index as i16
        };

        Some(Fragment {
            id: self.id,
            sequence_number,
            sequence_count: self.count as u16,
            payload,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Fragments<'_> {}

#[derive(Debug)]
struct ReassemblySlot {
    id: Option<u16>,
    buffer: Vec<u8>,
    arrived: u64,
    arrived_count: u16,
    expected: u16,
    last_len: usize,
    complete: bool,
}

impl ReassemblySlot {
    fn empty() -> Self {
        Self {
            id: None,
            buffer: Vec::new(),
            arrived: 0,
            arrived_count: 0,
            expected: 0,
            last_len: 0,
            complete: false,
        }
    }

    fn in_progress(&self) -> bool {
        !self.complete && self.arrived != 0
    }

    fn start(&mut self, id: u16, expected: u16, fragment_size: usize) {
        self.id = Some(id);
        self.arrived = 0;
        self.arrived_count = 0;
        self.expected = expected;
        self.last_len = 0;
        self.complete = false;
        self.buffer.resize(expected as usize * fragment_size, 0);
    }
}

/// Fixed set of in-flight reassembly slots
#[derive(Debug)]
pub struct Reassembler {
    slots: Vec<ReassemblySlot>,
    fragment_size: usize,
    max_fragments: usize,
    evictions: u64,
}

impl Reassembler {
    pub fn new(fragment_size: usize, in_flight: usize) -> Self {
        Self {
            slots: (0..in_flight.max(1)).map(|_| ReassemblySlot::empty()).collect(),
            fragment_size: fragment_size.clamp(1, i16::MAX as usize),
            max_fragments: MAX_FRAGMENTS_PER_PACKET,
            evictions: 0,
        }
    }

    /// Partial packets discarded because a newer id claimed their slot
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Forget every partial and completed packet.
    ///
    /// Buffers keep their allocation. Returns the number of partial packets
    /// discarded.
    pub fn clear(&mut self) -> usize {
        let mut discarded = 0;
        for slot in &mut self.slots {
            if slot.in_progress() {
                discarded += 1;
            }
            slot.id = None;
            slot.arrived = 0;
            slot.arrived_count = 0;
            slot.complete = false;
        }
        discarded
    }

    /// Check a fragment against the header rules; returns `(index, len)`
    fn locate(&self, fragment: &Fragment<'_>) -> Result<(usize, usize)> {
        let count = fragment.sequence_count as usize;
        if count == 0 || count > self.max_fragments {
            return Err(TransportError::MalformedFragment(constants::ERR_FRAGMENT_COUNT));
        }

        let len = fragment.payload.len();
        if fragment.sequence_number < 0 {
            let declared = fragment.sequence_number.unsigned_abs() as usize;
            if declared != len || declared > self.fragment_size {
                return Err(TransportError::MalformedFragment(constants::ERR_FRAGMENT_LENGTH));
            }
            return Ok((count - 1, len));
        }

        let index = fragment.sequence_number as usize;
        if index >= count {
            return Err(TransportError::MalformedFragment(constants::ERR_FRAGMENT_SEQUENCE));
        }
        if index == count - 1 {
            // Only an empty single-fragment payload has a non-negative terminal
            if count != 1 || len != 0 {
                return Err(TransportError::MalformedFragment(constants::ERR_FRAGMENT_LENGTH));
            }
            return Ok((0, 0));
        }
        if len != self.fragment_size {
            return Err(TransportError::MalformedFragment(constants::ERR_FRAGMENT_LENGTH));
        }
        Ok((index, len))
    }

    /// Feed one fragment; returns the whole payload once every piece arrived.
    ///
    /// Malformed fragments are rejected with an error and leave the slot as
    /// it was. Duplicates are ignored.
    pub fn reassemble(&mut self, fragment: &Fragment<'_>) -> Result<Option<&[u8]>> {
        let (index, len) = self.locate(fragment)?;
        let fragment_size = self.fragment_size;
        let slot_index = fragment.id as usize % self.slots.len();
        let slot = &mut self.slots[slot_index];

        if slot.id != Some(fragment.id) {
            if slot.in_progress() {
                warn!(
                    evicted = ?slot.id,
                    id = fragment.id,
                    received = slot.arrived_count,
                    expected = slot.expected,
                    "Dropped in-flight packet evicted by newer fragment id"
                );
                self.evictions += 1;
            }
            slot.start(fragment.id, fragment.sequence_count, fragment_size);
        } else if slot.complete {
            trace!(id = fragment.id, "Fragment for completed packet ignored");
            return Ok(None);
        } else if slot.expected != fragment.sequence_count {
            return Err(TransportError::MalformedFragment(constants::ERR_FRAGMENT_COUNT));
        }

        let bit = 1u64 << index;
        if slot.arrived & bit != 0 {
            return Ok(None);
        }

        let offset = index * fragment_size;
        slot.buffer[offset..offset + len].copy_from_slice(fragment.payload);
        if index + 1 == slot.expected as usize {
            slot.last_len = len;
        }
        slot.arrived |= bit;
        slot.arrived_count += 1;

        if slot.arrived_count < slot.expected {
            return Ok(None);
        }

        slot.complete = true;
        let total = (slot.expected as usize - 1) * fragment_size + slot.last_len;
        trace!(id = fragment.id, total, "Packet reassembled");
        Ok(Some(&slot.buffer[..total]))
    }
}
