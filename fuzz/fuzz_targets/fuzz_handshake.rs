#![no_main]

use libfuzzer_sys::fuzz_target;
use bridge_protocol::core::serialization;
use bridge_protocol::protocol::handshake;
use bridge_protocol::utils::crypto::Encryption;

fuzz_target!(|data: &[u8]| {
    let _ = handshake::parse_identification(data);

    // A decodable frame goes through handshake adoption as the initiating side would
    if let Ok(frame) = serialization::decode(data) {
        if let Ok(engine) = Encryption::new(&[0x11; 32]) {
            let _ = handshake::client_apply_handshake(&engine, &frame);
        }
    }
});
