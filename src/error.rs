// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the fingerprint sync engine.
//!
//! Errors are categorized by their source (peer transport, local filesystem,
//! payload decoding) and carry enough context (host, path, operation) to
//! debug a failed sync cycle from the logs alone.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `NotFound` | No | Coordinator has no record for the path |
//! | `NoAvailableHost` | Yes | No known cluster member holds the file (yet) |
//! | `ChecksumMismatch` | Yes | Peer returned bytes that fail verification |
//! | `Transport` | Yes | Network errors, timeouts, unexpected statuses |
//! | `Decode` | No | Malformed peer payload |
//! | `Io` | No | Local filesystem failure (needs operator attention) |
//! | `InvalidPath` | No | Path escapes the storage root |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Shutdown` | No | Engine is shutting down |
//!
//! # Propagation
//!
//! `ChecksumMismatch` is soft: [`Remoting::pull`](crate::remoting::Remoting::pull)
//! absorbs it and moves on to the next candidate host. It only surfaces in
//! logs and metrics. Everything else is returned to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fingerprint operations.
pub type Result<T> = std::result::Result<T, FingerprintError>;

/// Errors that can occur while indexing or synchronizing fingerprints.
#[derive(Error, Debug)]
pub enum FingerprintError {
    /// The coordinator has no record for the requested path.
    #[error("Fingerprint not found: {path}")]
    NotFound { path: String },

    /// None of the record's holders is a current cluster member.
    ///
    /// Raised before any network call is made.
    #[error("No available host for {path}")]
    NoAvailableHost { path: String },

    /// A peer returned content whose digest differs from the record.
    #[error("Checksum mismatch for {path} from {host}: expected {expected:016x}, got {actual:016x}")]
    ChecksumMismatch {
        path: String,
        host: String,
        expected: u64,
        actual: u64,
    },

    /// Network-level failure talking to a peer.
    ///
    /// Covers connection errors, timeouts and unexpected status codes.
    #[error("Transport error ({operation} -> {host}): {message}")]
    Transport {
        host: String,
        operation: String,
        message: String,
    },

    /// A peer payload could not be decoded.
    #[error("Decode error from {host}: {message}")]
    Decode {
        host: String,
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Local filesystem failure.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record path that would escape the storage root.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,
}

impl FingerprintError {
    /// Create an I/O error for a filesystem path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a transport error.
    pub fn transport(
        host: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            host: host.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a decode error from a serde_json failure.
    pub fn decode(host: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            host: host.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Check if this error is retryable on a later cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::NoAvailableHost { .. } => true, // membership may change
            Self::ChecksumMismatch { .. } => true,
            Self::NotFound { .. } => false,
            Self::Decode { .. } => false,
            Self::Io { .. } => false,
            Self::InvalidPath(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::NoAvailableHost { .. } => "no_available_host",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::Transport { .. } => "transport",
            Self::Decode { .. } => "decode",
            Self::Io { .. } => "io",
            Self::InvalidPath(_) => "invalid_path",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_transport() {
        let err = FingerprintError::transport("10.0.0.2:8080", "QUERY_INDEX", "connection reset");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("QUERY_INDEX"));
        assert!(err.to_string().contains("10.0.0.2:8080"));
    }

    #[test]
    fn test_is_retryable_no_available_host() {
        let err = FingerprintError::NoAvailableHost {
            path: "data.bin".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "no_available_host");
    }

    #[test]
    fn test_not_retryable_not_found() {
        let err = FingerprintError::NotFound {
            path: "a/b.txt".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("a/b.txt"));
    }

    #[test]
    fn test_not_retryable_decode() {
        let source = serde_json::from_str::<u64>("not json").unwrap_err();
        let err = FingerprintError::decode("peer-1", source);
        assert!(!err.is_retryable());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_not_retryable_io() {
        let err = FingerprintError::io(
            "/var/lib/files/.fp",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_retryable());
        assert!(err.to_string().contains(".fp"));
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_checksum_mismatch_formatting() {
        let err = FingerprintError::ChecksumMismatch {
            path: "data.bin".to_string(),
            host: "peer-2".to_string(),
            expected: 0xAB,
            actual: 0xCD,
        };
        let msg = err.to_string();
        assert!(msg.contains("00000000000000ab"));
        assert!(msg.contains("00000000000000cd"));
        assert!(msg.contains("peer-2"));
    }

    #[test]
    fn test_invalid_state_formatting() {
        let err = FingerprintError::InvalidState {
            expected: "Created".to_string(),
            actual: "Running".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Created"));
        assert!(err.to_string().contains("Running"));
    }

    #[test]
    fn test_not_retryable_shutdown() {
        assert!(!FingerprintError::Shutdown.is_retryable());
        assert_eq!(FingerprintError::Shutdown.kind(), "shutdown");
    }
}
