#![no_main]

use libfuzzer_sys::fuzz_target;
use bridge_protocol::utils::crypto::{Encryption, NonceIndices};

fuzz_target!(|data: &[u8]| {
    let Ok(engine) = Encryption::new(&[0x5A; 32]) else {
        return;
    };

    // Arbitrary bytes under both the session-start and a rotated layout
    let _ = engine.decrypt(data);
    if let Ok(rotated) = NonceIndices::new(&[23, 1, 12, 7, 0, 19, 4, 15, 9, 21, 3, 11]) {
        let _ = engine.decrypt_with(data, &rotated);
    }
});
