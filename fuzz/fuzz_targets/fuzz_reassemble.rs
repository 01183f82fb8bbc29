#![no_main]

use datagram_transport::core::bit_buffer::BitSlice;
use datagram_transport::protocol::fragment::{Fragment, Reassembler};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz fragment parsing and reassembly - test for panics and out-of-bounds writes
    let mut reassembler = Reassembler::new(16, 4);
    for chunk in data.chunks(6 + 16) {
        if let Ok(fragment) = Fragment::read(&mut BitSlice::new(chunk)) {
            if let Ok(Some(complete)) = reassembler.reassemble(&fragment) {
                assert!(complete.len() <= 16 * 64);
            }
        }
    }
});
