#![no_main]

use libfuzzer_sys::fuzz_target;
use bridge_protocol::core::serialization;

fuzz_target!(|data: &[u8]| {
    // Envelope parsing must reject, never panic
    let _ = serialization::decode(data);
});
