//! Fuzz target for GET_RECORD response decoding.

#![no_main]

use fingerprint_sync::FingerprintRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<FingerprintRecord>(data);
});
