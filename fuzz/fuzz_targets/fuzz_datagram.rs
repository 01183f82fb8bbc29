#![no_main]

use std::io::IoSlice;

use datagram_transport::utils::time::ManualClock;
use datagram_transport::{
    DatagramChannel, Endpoint, LocalRegistry, TransportConfig, TransportDriver,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary datagrams fed to a listening driver must never panic
    let registry = LocalRegistry::default();
    let Ok(mut driver) =
        TransportDriver::with_clock(registry.channel(), TransportConfig::default(), ManualClock::new())
    else {
        return;
    };
    if driver.bind(&Endpoint::local(1, 1)).is_err() {
        return;
    }
    driver.listen();

    let mut peer = registry.channel();
    if peer.bind(&Endpoint::local(2, 1)).is_err() {
        return;
    }
    // Split the input into datagrams on 0xFF separators
    for datagram in data.split(|&b| b == 0xFF) {
        let _ = peer.send_message(&[IoSlice::new(datagram)], &Endpoint::local(1, 1));
    }
    let _ = driver.update();
    while driver.pop_event().is_some() {}
});
