// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Content digest used to fingerprint files.
//!
//! The digest is a seam: the index and the remoting layer only see the
//! [`Checksum`] trait, so deployments can swap the algorithm as long as every
//! node in the cluster agrees on it.

use std::sync::Arc;

/// A 64-bit content digest.
pub trait Checksum: Send + Sync + 'static {
    /// Digest a whole buffer.
    fn digest(&self, data: &[u8]) -> u64;

    /// Check whether `data` matches `expected`.
    fn verify(&self, data: &[u8], expected: u64) -> bool {
        self.digest(data) == expected
    }
}

/// Shared, type-erased checksum handle.
pub type ChecksumRef = Arc<dyn Checksum>;

/// XXH3 64-bit digest (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3Checksum;

impl Checksum for Xxh3Checksum {
    fn digest(&self, data: &[u8]) -> u64 {
        xxhash_rust::xxh3::xxh3_64(data)
    }
}

/// Default checksum handle.
pub fn default_checksum() -> ChecksumRef {
    Arc::new(Xxh3Checksum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xxh3_deterministic() {
        let c = Xxh3Checksum;
        assert_eq!(c.digest(b"hello"), c.digest(b"hello"));
        assert_ne!(c.digest(b"hello"), c.digest(b"hello!"));
    }

    #[test]
    fn test_verify() {
        let c = default_checksum();
        let sum = c.digest(b"payload");
        assert!(c.verify(b"payload", sum));
        assert!(!c.verify(b"payl0ad", sum));
    }

    #[test]
    fn test_empty_buffer() {
        let c = Xxh3Checksum;
        assert_eq!(c.digest(&[]), xxhash_rust::xxh3::xxh3_64(&[]));
    }
}
