//! Fuzz target for path validation.
//!
//! Any path `validate_path` accepts must stay under the root when joined,
//! and canonicalizing a path must be a fixed point.

#![no_main]

use fingerprint_sync::record::{canonical_path, validate_path};
use libfuzzer_sys::fuzz_target;
use std::path::{Component, Path};

fuzz_target!(|path: &str| {
    if validate_path(path).is_ok() {
        let joined = Path::new("/srv/root").join(path);
        assert!(joined.starts_with("/srv/root"));
        assert!(!joined
            .components()
            .any(|c| matches!(c, Component::ParentDir)));
    }
    if let Ok(canonical) = canonical_path(path) {
        assert!(validate_path(&canonical).is_ok());
        assert_eq!(canonical_path(&canonical).ok().as_deref(), Some(canonical.as_str()));
    }
});
