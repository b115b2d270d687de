//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The durable medium failed. Surfaced to the caller; the store
    /// never retries on its own.
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The journal contains a record that cannot be decoded.
    #[error("journal corrupted: {message}")]
    Corruption {
        /// Description of what failed to decode.
        message: String,
    },

    /// A journal record's checksum did not match its contents.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum recorded in the journal.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }
}
