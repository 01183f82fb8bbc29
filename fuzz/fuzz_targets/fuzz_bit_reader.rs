#![no_main]

use datagram_transport::core::bit_buffer::BitSlice;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The first byte seeds the read widths, the rest is the stream
    let Some((&seed, stream)) = data.split_first() else {
        return;
    };
    let mut reader = BitSlice::new(stream);
    let mut width = u32::from(seed % 32) + 1;
    while reader.read_bits(width).is_ok() {
        assert!(reader.bits_read() <= stream.len() * 8);
        width = (width * 7 + 3) % 32 + 1;
    }
    let _ = reader.read_bytes(usize::from(seed));
    let _ = reader.remaining_bytes();
});
