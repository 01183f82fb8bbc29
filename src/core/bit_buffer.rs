//! # Bit Buffer
//!
//! Fixed-capacity byte buffer with a bit-granularity write cursor, and the
//! companion [`BitSlice`] read cursor.
//!
//! Every packet the transport emits is written through a [`BitBuffer`]; every
//! packet it receives is parsed through a [`BitSlice`] created over a range of
//! one.
//!
//! ## Wire Layout
//! Bits are packed least-significant first. A value written with
//! `write_bits(v, n)` occupies the next `n` bits of the stream, so byte-aligned
//! multi-byte integers land on the wire in little-endian order. Floats are sent
//! as their raw IEEE-754 bit pattern (`f32::to_bits`); NaN payloads are not
//! canonicalized.
//!
//! ```text
//! write_bits(0b101, 3); write_bits(0x1F, 5);
//! byte 0: [1 1 1 1 1 | 1 0 1]   (msb .. lsb)
//! ```
//!
//! ## Capacity
//! A write that does not fit in the remaining capacity is rejected with
//! [`TransportError::BufferOverflow`] and leaves the buffer untouched.
//! Pending bits of a partially filled byte are held in a scratch accumulator
//! and mirrored into the backing byte on every write, so views returned by
//! [`BitBuffer::as_bytes`] always include them.

use crate::error::{Result, TransportError};

/// Largest value accepted by `write_bits`/`read_bits`
pub const MAX_BITS_PER_CALL: u32 = 32;

#[inline]
fn mask(bit_count: u32) -> u64 {
    (1u64 << bit_count) - 1
}

#[inline]
fn check_bit_count(bit_count: u32) -> Result<()> {
    if bit_count == 0 || bit_count > MAX_BITS_PER_CALL {
        return Err(TransportError::InvalidBitCount(bit_count));
    }
    Ok(())
}

/// Fixed-capacity bit-packed write buffer
#[derive(Debug, Clone)]
pub struct BitBuffer {
    data: Vec<u8>,
    capacity_bits: usize,
    /// Index of the byte currently being filled
    byte_index: usize,
    /// Pending bits not yet forming a whole byte, LSB first
    scratch: u64,
    scratch_bits: u32,
}

impl BitBuffer {
    /// Create a buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            capacity_bits: capacity * 8,
            byte_index: 0,
            scratch: 0,
            scratch_bits: 0,
        }
    }

    /// Write the low `bit_count` bits of `value` (1-32 bits)
    pub fn write_bits(&mut self, value: u32, bit_count: u32) -> Result<()> {
        check_bit_count(bit_count)?;
        self.ensure_remaining(bit_count as usize)?;

        self.scratch |= (u64::from(value) & mask(bit_count)) << self.scratch_bits;
        self.scratch_bits += bit_count;

        while self.scratch_bits >= 8 {
            self.data[self.byte_index] = self.scratch as u8;
            self.byte_index += 1;
            self.scratch >>= 8;
            self.scratch_bits -= 8;
        }
        if self.scratch_bits > 0 {
            self.data[self.byte_index] = self.scratch as u8;
        }
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_bits(u32::from(value), 1)
    }

    pub fn write_byte(&mut self, value: u8) -> Result<()> {
        self.write_bits(u32::from(value), 8)
    }

    pub fn write_short(&mut self, value: i16) -> Result<()> {
        self.write_bits(u32::from(value as u16), 16)
    }

    pub fn write_int(&mut self, value: i32) -> Result<()> {
        self.write_bits(value as u32, 32)
    }

    pub fn write_float(&mut self, value: f32) -> Result<()> {
        self.write_bits(value.to_bits(), 32)
    }

    /// Byte-align, then copy `bytes` verbatim.
    ///
    /// The whole slice must fit; nothing is written otherwise.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let padding = self.padding_bits();
        self.ensure_remaining(padding + bytes.len() * 8)?;
        self.write_align();

        let end = self.byte_index + bytes.len();
        self.data[self.byte_index..end].copy_from_slice(bytes);
        self.byte_index = end;
        Ok(())
    }

    /// Pad with zero bits up to the next byte boundary
    pub fn write_align(&mut self) {
        let padding = self.padding_bits();
        if padding > 0 {
            // Padding never crosses the last byte boundary, so it always fits.
            self.scratch_bits = 0;
            self.scratch = 0;
            self.byte_index += 1;
        }
    }

    pub fn bits_written(&self) -> usize {
        self.byte_index * 8 + self.scratch_bits as usize
    }

    /// Bytes touched so far, rounding a partial byte up
    pub fn bytes_written(&self) -> usize {
        self.bits_written().div_ceil(8)
    }

    /// Remaining capacity in bits
    pub fn capacity_remaining(&self) -> usize {
        self.capacity_bits - self.bits_written()
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits_written() == 0
    }

    /// Written bytes, including a trailing partial byte
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.bytes_written()]
    }

    /// Discard everything written
    pub fn reset(&mut self) {
        self.byte_index = 0;
        self.scratch = 0;
        self.scratch_bits = 0;
    }

    /// Drop everything written past `byte_len` bytes.
    ///
    /// The cursor ends byte-aligned. Has no effect if `byte_len` is at or
    /// beyond the current write position.
    pub fn truncate(&mut self, byte_len: usize) {
        if byte_len < self.bytes_written() {
            self.byte_index = byte_len;
            self.scratch = 0;
            self.scratch_bits = 0;
        }
    }

    /// Byte-align and expose the unwritten tail for direct filling.
    ///
    /// Pair with [`BitBuffer::commit_bytes`] once the number of bytes
    /// actually filled is known.
    pub fn spare_capacity_mut(&mut self) -> &mut [u8] {
        self.write_align();
        &mut self.data[self.byte_index..]
    }

    /// Advance the cursor over `len` bytes filled through
    /// [`BitBuffer::spare_capacity_mut`].
    pub fn commit_bytes(&mut self, len: usize) -> Result<()> {
        self.write_align();
        let remaining = self.data.len() - self.byte_index;
        if len > remaining {
            return Err(TransportError::BufferOverflow {
                requested: len * 8,
                remaining: remaining * 8,
            });
        }
        self.byte_index += len;
        Ok(())
    }

    /// Read cursor over everything written so far
    pub fn reader(&self) -> BitSlice<'_> {
        BitSlice::new(self.as_bytes())
    }

    /// Read cursor over a byte sub-range of the written region
    pub fn slice(&self, byte_offset: usize, byte_len: usize) -> Result<BitSlice<'_>> {
        let written = self.bytes_written();
        let end = byte_offset
            .checked_add(byte_len)
            .filter(|&end| end <= written)
            .ok_or(TransportError::BufferUnderflow {
                requested: byte_offset.saturating_add(byte_len).saturating_mul(8),
                remaining: written * 8,
            })?;
        Ok(BitSlice::new(&self.data[byte_offset..end]))
    }

    /// Raw bytes of a sub-range of the written region
    pub fn bytes(&self, byte_offset: usize, byte_len: usize) -> Option<&[u8]> {
        let end = byte_offset.checked_add(byte_len)?;
        if end > self.bytes_written() {
            return None;
        }
        Some(&self.data[byte_offset..end])
    }

    #[inline]
    fn padding_bits(&self) -> usize {
        if self.scratch_bits == 0 {
            0
        } else {
            8 - self.scratch_bits as usize
        }
    }

    #[inline]
    fn ensure_remaining(&self, requested: usize) -> Result<()> {
        let remaining = self.capacity_remaining();
        if requested > remaining {
            return Err(TransportError::BufferOverflow {
                requested,
                remaining,
            });
        }
        Ok(())
    }
}

/// Read cursor over a borrowed byte range
#[derive(Debug, Clone)]
pub struct BitSlice<'a> {
    data: &'a [u8],
    bit_len: usize,
    bit_pos: usize,
}

impl<'a> BitSlice<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_len: data.len() * 8,
            bit_pos: 0,
        }
    }

    /// Read `bit_count` bits (1-32) as an unsigned value
    pub fn read_bits(&mut self, bit_count: u32) -> Result<u32> {
        check_bit_count(bit_count)?;
        self.ensure_remaining(bit_count as usize)?;

        let mut value = 0u64;
        let mut produced = 0u32;
        while produced < bit_count {
            let byte = self.data[self.bit_pos / 8];
            let offset = (self.bit_pos % 8) as u32;
            let take = (8 - offset).min(bit_count - produced);
            let bits = (u64::from(byte) >> offset) & mask(take);
            value |= bits << produced;
            produced += take;
            self.bit_pos += take as usize;
        }
        Ok(value as u32)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_short(&mut self) -> Result<i16> {
        Ok(self.read_bits(16)? as u16 as i16)
    }

    pub fn read_int(&mut self) -> Result<i32> {
        Ok(self.read_bits(32)? as i32)
    }

    pub fn read_float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_bits(32)?))
    }

    /// Byte-align, then borrow the next `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.bit_pos.div_ceil(8);
        let end = start.checked_add(len).ok_or(TransportError::BufferUnderflow {
            requested: usize::MAX,
            remaining: self.bits_remaining(),
        })?;
        if end > self.data.len() {
            return Err(TransportError::BufferUnderflow {
                requested: len.saturating_mul(8),
                remaining: self.bit_len.saturating_sub(start * 8),
            });
        }
        self.bit_pos = end * 8;
        Ok(&self.data[start..end])
    }

    /// Skip to the next byte boundary
    pub fn read_align(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }

    /// Everything from the next byte boundary to the end
    pub fn remaining_bytes(&mut self) -> &'a [u8] {
        self.read_align();
        let start = (self.bit_pos / 8).min(self.data.len());
        self.bit_pos = self.bit_len;
        &self.data[start..]
    }

    pub fn bits_read(&self) -> usize {
        self.bit_pos
    }

    pub fn bytes_read(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }

    pub fn bits_remaining(&self) -> usize {
        self.bit_len - self.bit_pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn ensure_remaining(&self, requested: usize) -> Result<()> {
        let remaining = self.bits_remaining();
        if requested > remaining {
            return Err(TransportError::BufferUnderflow {
                requested,
                remaining,
            });
        }
        Ok(())
    }
}
