//! Fuzz target for table decoding.
//!
//! Snapshot files and QUERY_INDEX / NOTIFY bodies all go through
//! `snapshot::decode`. It must never panic, and every key it keeps must be a
//! safe path matching its record.

#![no_main]

use fingerprint_sync::index::snapshot;
use fingerprint_sync::record::validate_path;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(table) = snapshot::decode(data) {
        for (key, record) in &table {
            assert!(validate_path(key).is_ok());
            assert_eq!(key, &record.path);
        }
    }
});
