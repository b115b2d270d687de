//! # docsync Store
//!
//! Durable, crash-consistent local storage for the docsync offline engine.
//!
//! The store holds three record families:
//! - **Offline records** — metadata for documents kept available offline
//! - **File blobs** — binary content, 1:1 with an offline record
//! - **Sync queue items** — pending mutations awaiting remote confirmation
//!
//! ## Design
//!
//! All state lives in an append-only journal over a [`StorageBackend`].
//! Every mutating verb appends a record and syncs it to durable media
//! before returning, so "enqueued" always implies "survives restart".
//! On open the journal is replayed into in-memory maps; a torn or
//! corrupt tail record is discarded rather than failing the open.
//!
//! The journal grows with touch and remove traffic; once it exceeds a
//! configured threshold the store rewrites a snapshot of live state and
//! atomically replaces the journal file.
//!
//! ## Ownership
//!
//! The store is the sole owner of the three families. Other engine
//! components mutate them only through the verbs exposed here.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod journal;
mod store;
mod types;

pub use backend::{FileBackend, InMemoryBackend, StorageBackend};
pub use error::{StoreError, StoreResult};
pub use journal::{Journal, JournalRecord};
pub use store::{LocalStore, StoreConfig, StoreStats};
pub use types::{
    now_millis, EntityKind, OfflineRecord, Operation, QueueStatus, SyncQueueItem, SyncStatus,
};
