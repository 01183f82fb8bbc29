#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for boundary conditions and malformed input
//! Covers buffer limits, header parsing, fragment validation and handle identity

use datagram_transport::core::bit_buffer::{BitBuffer, BitSlice};
use datagram_transport::core::endpoint::{Endpoint, TransportFamily};
use datagram_transport::core::handle::{ConnectionHandle, HandleTable};
use datagram_transport::core::packet::{PacketHeader, PacketType};
use datagram_transport::error::TransportError;
use datagram_transport::protocol::event_queue::{Event, EventQueue};
use datagram_transport::protocol::fragment::{
    Fragment, Fragmenter, Reassembler, FRAGMENT_HEADER_SIZE,
};
use std::net::Ipv4Addr;

// ============================================================================
// BIT BUFFER EDGE CASES
// ============================================================================

#[test]
fn test_bit_buffer_zero_capacity() {
    let mut buffer = BitBuffer::new(0);
    assert!(buffer.is_empty());
    assert!(matches!(
        buffer.write_bool(true),
        Err(TransportError::BufferOverflow { requested: 1, remaining: 0 })
    ));
    assert!(buffer.write_bytes(&[]).is_ok());
    assert_eq!(buffer.as_bytes(), &[] as &[u8]);
}

#[test]
fn test_bit_buffer_exact_fill() {
    let mut buffer = BitBuffer::new(4);
    buffer.write_int(-1).unwrap();
    assert_eq!(buffer.capacity_remaining(), 0);
    assert!(buffer.write_bool(false).is_err());
    assert_eq!(buffer.as_bytes(), &[0xFF; 4]);
}

#[test]
fn test_bit_buffer_invalid_bit_counts() {
    let mut buffer = BitBuffer::new(8);
    assert!(matches!(
        buffer.write_bits(1, 0),
        Err(TransportError::InvalidBitCount(0))
    ));
    assert!(matches!(
        buffer.write_bits(1, 33),
        Err(TransportError::InvalidBitCount(33))
    ));
    assert_eq!(buffer.bits_written(), 0);

    let mut reader = BitSlice::new(&[0xAA; 8]);
    assert!(reader.read_bits(0).is_err());
    assert!(reader.read_bits(40).is_err());
    assert_eq!(reader.bits_read(), 0);
}

#[test]
fn test_bit_buffer_lsb_first_layout() {
    let mut buffer = BitBuffer::new(4);
    buffer.write_bits(0b101, 3).unwrap();
    buffer.write_bits(0x1F, 5).unwrap();
    buffer.write_short(0x0102).unwrap();
    assert_eq!(buffer.as_bytes(), &[0b1111_1101, 0x02, 0x01]);
}

#[test]
fn test_bit_buffer_partial_byte_visible() {
    let mut buffer = BitBuffer::new(2);
    buffer.write_bits(0b11, 2).unwrap();
    assert_eq!(buffer.bits_written(), 2);
    assert_eq!(buffer.bytes_written(), 1);
    assert_eq!(buffer.as_bytes(), &[0b11]);
}

#[test]
fn test_write_bytes_needs_room_for_padding() {
    let mut buffer = BitBuffer::new(2);
    buffer.write_bool(true).unwrap();
    // One padding byte plus two payload bytes does not fit
    assert!(buffer.write_bytes(&[1, 2]).is_err());
    assert_eq!(buffer.bits_written(), 1);
    buffer.write_bytes(&[7]).unwrap();
    assert_eq!(buffer.as_bytes(), &[1, 7]);
}

#[test]
fn test_read_underflow() {
    let data = [0x12u8, 0x34];
    let mut reader = BitSlice::new(&data);
    assert_eq!(reader.read_short().unwrap(), 0x3412);
    assert!(matches!(
        reader.read_bool(),
        Err(TransportError::BufferUnderflow { requested: 1, remaining: 0 })
    ));

    let mut reader = BitSlice::new(&data);
    assert!(reader.read_bytes(3).is_err());
    assert_eq!(reader.read_bytes(2).unwrap(), &data);
}

#[test]
fn test_truncate_and_reset() {
    let mut buffer = BitBuffer::new(8);
    buffer.write_int(0x0403_0201).unwrap();
    buffer.write_bits(0b1, 3).unwrap();

    buffer.truncate(10);
    assert_eq!(buffer.bytes_written(), 5);
    buffer.truncate(2);
    assert_eq!(buffer.as_bytes(), &[1, 2]);
    buffer.reset();
    assert!(buffer.is_empty());
}

#[test]
fn test_slice_bounds_checked() {
    let mut buffer = BitBuffer::new(8);
    buffer.write_bytes(&[1, 2, 3]).unwrap();
    assert!(buffer.slice(1, 2).is_ok());
    assert!(buffer.slice(2, 2).is_err());
    assert!(buffer.slice(usize::MAX, 2).is_err());
    assert_eq!(buffer.bytes(0, 3), Some(&[1u8, 2, 3][..]));
    assert_eq!(buffer.bytes(3, 1), None);
}

#[test]
fn test_float_bit_pattern_preserved() {
    let nan = f32::from_bits(0x7FC0_1234);
    let mut buffer = BitBuffer::new(8);
    buffer.write_float(nan).unwrap();
    buffer.write_float(-0.0).unwrap();

    let mut reader = buffer.reader();
    assert_eq!(reader.read_float().unwrap().to_bits(), 0x7FC0_1234);
    assert_eq!(reader.read_float().unwrap().to_bits(), (-0.0f32).to_bits());
}

// ============================================================================
// PACKET HEADER EDGE CASES
// ============================================================================

#[test]
fn test_header_too_short() {
    assert!(matches!(
        PacketHeader::from_bytes(&[5, 0, 0]),
        Err(TransportError::InvalidHeader)
    ));
    assert!(PacketHeader::from_bytes(&[]).is_err());
}

#[test]
fn test_header_unknown_types() {
    for byte in [0u8, 7, 0xFF] {
        assert!(matches!(
            PacketHeader::from_bytes(&[byte, 0, 0, 0]),
            Err(TransportError::UnknownPacketType(b)) if b == byte
        ));
    }
}

#[test]
fn test_header_ignores_reserved_bytes() {
    let header = PacketHeader::from_bytes(&[6, 0xAA, 0xBB, 0xCC, 1, 2]).unwrap();
    assert_eq!(header.packet_type, PacketType::Fragment);
    assert!(header.packet_type.carries_payload());
    assert!(!header.packet_type.is_handshake());
}

// ============================================================================
// FRAGMENT EDGE CASES
// ============================================================================

#[test]
fn test_fragment_header_truncated() {
    let mut slice = BitSlice::new(&[1, 0, 0]);
    assert!(matches!(
        Fragment::read(&mut slice),
        Err(TransportError::MalformedFragment(_))
    ));
}

#[test]
fn test_empty_payload_single_fragment() {
    let fragmenter = Fragmenter::new(16);
    let fragments: Vec<_> = fragmenter.fragment(&[], 3).unwrap().collect();
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].sequence_number, 0);
    assert_eq!(fragments[0].sequence_count, 1);
    assert!(fragments[0].is_terminal());

    let mut reassembler = Reassembler::new(16, 2);
    assert_eq!(
        reassembler.reassemble(&fragments[0]).unwrap(),
        Some(&[] as &[u8])
    );
}

#[test]
fn test_oversized_payload_rejected() {
    let fragmenter = Fragmenter::new(4);
    assert_eq!(fragmenter.max_packet_size(), 256);
    assert!(fragmenter.fragment(&[0u8; 256], 1).is_ok());
    assert!(matches!(
        fragmenter.fragment(&[0u8; 257], 1),
        Err(TransportError::OversizedPacket(257))
    ));
}

#[test]
fn test_malformed_fragments_rejected() {
    let mut reassembler = Reassembler::new(4, 2);
    let bad = [
        // zero count
        Fragment { id: 1, sequence_number: 0, sequence_count: 0, payload: &[1, 2, 3, 4] },
        // count above the bitmap width
        Fragment { id: 1, sequence_number: 0, sequence_count: 65, payload: &[1, 2, 3, 4] },
        // index past the count
        Fragment { id: 1, sequence_number: 5, sequence_count: 2, payload: &[1, 2, 3, 4] },
        // middle fragment shorter than the fragment size
        Fragment { id: 1, sequence_number: 0, sequence_count: 2, payload: &[1, 2] },
        // terminal length disagrees with its payload
        Fragment { id: 1, sequence_number: -3, sequence_count: 2, payload: &[1, 2] },
        // terminal longer than a fragment
        Fragment { id: 1, sequence_number: -5, sequence_count: 2, payload: &[1, 2, 3, 4, 5] },
    ];
    for fragment in &bad {
        assert!(
            matches!(
                reassembler.reassemble(fragment),
                Err(TransportError::MalformedFragment(_))
            ),
            "accepted {:?}",
            fragment
        );
    }
}

#[test]
fn test_duplicate_fragments_ignored() {
    let fragmenter = Fragmenter::new(4);
    let payload = [9u8; 10];
    let fragments: Vec<_> = fragmenter.fragment(&payload, 11).unwrap().collect();
    assert_eq!(fragments.len(), 3);

    let mut reassembler = Reassembler::new(4, 1);
    assert_eq!(reassembler.reassemble(&fragments[0]).unwrap(), None);
    assert_eq!(reassembler.reassemble(&fragments[0]).unwrap(), None);
    assert_eq!(reassembler.reassemble(&fragments[2]).unwrap(), None);
    assert_eq!(
        reassembler.reassemble(&fragments[1]).unwrap(),
        Some(&payload[..])
    );
    // A late copy of a completed packet is ignored
    assert_eq!(reassembler.reassemble(&fragments[1]).unwrap(), None);
}

#[test]
fn test_terminal_fragment_encodes_negative_length() {
    let fragmenter = Fragmenter::new(4);
    let fragments: Vec<_> = fragmenter.fragment(&[1, 2, 3, 4, 5, 6], 0x0102).unwrap().collect();
    let last = fragments.last().unwrap();
    assert_eq!(last.sequence_number, -2);

    let mut buffer = BitBuffer::new(FRAGMENT_HEADER_SIZE + last.payload.len());
    last.write_header(&mut buffer).unwrap();
    buffer.write_bytes(last.payload).unwrap();
    assert_eq!(buffer.as_bytes(), &[0x02, 0x01, 0xFE, 0xFF, 0x02, 0x00, 5, 6]);
}

// ============================================================================
// ENDPOINT AND HANDLE EDGE CASES
// ============================================================================

#[test]
fn test_endpoint_validity() {
    assert!(!Endpoint::default().is_valid());
    assert!(!Endpoint::udp(Ipv4Addr::LOCALHOST, 0).is_valid());
    assert!(Endpoint::local(0, 1).is_valid());

    let udp = Endpoint::udp(Ipv4Addr::new(10, 0, 0, 1), 9000);
    assert!(udp.ensure(TransportFamily::Udp).is_ok());
    assert!(matches!(
        udp.ensure(TransportFamily::Local),
        Err(TransportError::InvalidEndpoint(_))
    ));
    assert_eq!(udp.to_string(), "10.0.0.1:9000");
    assert_eq!(udp.local_handle(), None);
    assert_eq!(Endpoint::local(42, 5).local_handle(), Some(42));
    assert_eq!(Endpoint::local(42, 5).to_socket_addr(), None);
}

#[test]
fn test_endpoint_equality_is_structural() {
    assert_eq!(Endpoint::local(1, 2), Endpoint::local(1, 2));
    assert_ne!(Endpoint::local(1, 2), Endpoint::local(1, 3));
    assert_ne!(
        Endpoint::local(u32::from_le_bytes([127, 0, 0, 1]), 80),
        Endpoint::udp(Ipv4Addr::LOCALHOST, 80)
    );
}

#[test]
fn test_invalid_handle_never_current() {
    let mut table = HandleTable::new(2);
    assert!(!ConnectionHandle::INVALID.is_issued());
    assert!(!table.is_current(ConnectionHandle::INVALID));

    let handle = table.acquire().unwrap();
    assert!(handle.is_issued());
    assert!(!table.is_current(ConnectionHandle::new(handle.slot(), 0)));
    assert!(!table.is_current(ConnectionHandle::new(7, 1)));
}

#[test]
fn test_handle_table_exhaustion() {
    let mut table = HandleTable::new(2);
    let a = table.acquire().unwrap();
    let _b = table.acquire().unwrap();
    assert!(table.acquire().is_none());

    table.release(a.slot());
    let c = table.acquire().unwrap();
    assert_eq!(c.slot(), a.slot());
    assert_eq!(c.generation(), a.generation() + 1);
}

#[test]
fn test_generation_skips_zero_on_wrap() {
    let mut table = HandleTable::new(1);
    let mut last = table.acquire().unwrap();
    for _ in 0..u16::MAX as usize + 2 {
        table.release(last.slot());
        last = table.acquire().unwrap();
        assert_ne!(last.generation(), 0);
    }
}

// ============================================================================
// EVENT QUEUE EDGE CASES
// ============================================================================

#[test]
fn test_event_queue_capacity_per_slot() {
    let a = ConnectionHandle::new(0, 1);
    let b = ConnectionHandle::new(1, 1);
    let mut queue = EventQueue::new(2, 1);

    queue.push(Event::connect(a)).unwrap();
    assert!(matches!(
        queue.push(Event::data(a, 0, 1)),
        Err(TransportError::EventQueueFull(0))
    ));
    // Other slots are unaffected
    queue.push(Event::connect(b)).unwrap();
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_event_queue_reset_discards_everything() {
    let a = ConnectionHandle::new(0, 1);
    let mut queue = EventQueue::new(1, 4);
    queue.push(Event::connect(a)).unwrap();
    queue.push(Event::data(a, 0, 3)).unwrap();

    assert_eq!(queue.reset(), 2);
    assert!(queue.is_empty());
    assert!(queue.pop_global().is_none());
    assert!(queue.pop_for_connection(0).is_none());
}
