//! Fuzz target: `Dispatcher::deliver`
//!
//! Feeds arbitrary frames to the dispatcher's inbound router. Malformed
//! frames are rejected with an error, never a panic.
//!
//! cargo fuzz run fuzz_deliver

#![no_main]

use libfuzzer_sys::fuzz_target;
use nwp_host::{Dispatcher, DriverConfig};

fuzz_target!(|data: &[u8]| {
    let dispatcher = Dispatcher::new(&DriverConfig::default());
    for frame in data.split(|&b| b == 0xA5) {
        let _ = dispatcher.deliver(frame);
    }
    assert!(dispatcher.pool().available() <= dispatcher.pool().capacity());
});
