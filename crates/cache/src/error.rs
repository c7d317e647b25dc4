//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(taskmemo::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(taskmemo::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A value failed validation (bad hex digest, unsafe path, ...)
    #[error("Invalid value: {message}")]
    #[diagnostic(code(taskmemo::cache::validation))]
    Validation {
        /// What was wrong
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(taskmemo::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// A stored entry failed its checksum or metadata check
    #[error("Corrupt cache entry {fingerprint}: {message}")]
    #[diagnostic(
        code(taskmemo::cache::corrupt_entry),
        help("The entry is evicted and the task re-executes")
    )]
    CorruptEntry {
        /// Fingerprint of the entry (hex)
        fingerprint: String,
        /// What failed to verify
        message: String,
    },

    /// The remote tier could not be reached
    #[error("Remote cache '{store}' unavailable: {message}")]
    #[diagnostic(
        code(taskmemo::cache::remote_unavailable),
        help("The run continues with the local cache only")
    )]
    RemoteUnavailable {
        /// Remote store name
        store: String,
        /// Underlying failure
        message: String,
    },

    /// The remote answered with an unexpected status
    #[error("Remote cache '{store}' returned HTTP {status} for {operation}")]
    #[diagnostic(code(taskmemo::cache::remote_status))]
    RemoteStatus {
        /// Remote store name
        store: String,
        /// Operation (get/put)
        operation: String,
        /// HTTP status code
        status: u16,
    },

    /// Retries of a remote operation ran out
    #[error("{operation} failed after {attempts} attempts: {message}")]
    #[diagnostic(code(taskmemo::cache::retry_exhausted))]
    RetryExhausted {
        /// Operation name
        operation: String,
        /// Attempts made
        attempts: u32,
        /// Last error seen
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a validation error
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a corrupt entry error
    #[must_use]
    pub fn corrupt(fingerprint: impl ToString, msg: impl Into<String>) -> Self {
        Self::CorruptEntry {
            fingerprint: fingerprint.to_string(),
            message: msg.into(),
        }
    }

    /// Create a remote unavailable error
    #[must_use]
    pub fn remote_unavailable(store: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            store: store.into(),
            message: msg.into(),
        }
    }

    /// Create a retry exhausted error
    #[must_use]
    pub fn retry_exhausted(operation: impl Into<String>, attempts: u32, msg: impl Into<String>) -> Self {
        Self::RetryExhausted {
            operation: operation.into(),
            attempts,
            message: msg.into(),
        }
    }

    /// Whether this error means stored data is damaged
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptEntry { .. })
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
