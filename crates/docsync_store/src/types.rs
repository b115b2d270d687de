//! Durable record types for the three store families.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current time as milliseconds since the Unix epoch.
///
/// All durable timestamps in the store use this representation so they
/// round-trip through the journal without precision questions.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Synchronization state of an offline record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// The record matches the server copy.
    Synced,
    /// The record has local mutations awaiting delivery.
    Pending,
    /// The record exists only on this device.
    LocalOnly,
}

/// Locally retained metadata for one document.
///
/// Created when a document is explicitly marked for offline availability,
/// destroyed by explicit removal or by eviction. `last_accessed` is bumped
/// on every read and is monotonically non-decreasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRecord {
    /// Opaque document identifier, unique within the store.
    pub id: String,
    /// Document title.
    pub title: String,
    /// Original file name.
    pub file_name: String,
    /// MIME type of the content.
    pub mime_type: String,
    /// Content size in bytes.
    pub file_size: u64,
    /// Optional thumbnail reference.
    pub thumbnail: Option<String>,
    /// When the content was downloaded (unix millis).
    pub downloaded_at: u64,
    /// When the record was last read (unix millis).
    pub last_accessed: u64,
    /// Synchronization state.
    pub sync_status: SyncStatus,
}

impl OfflineRecord {
    /// Creates a record with both timestamps set to now.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            title: title.into(),
            file_name: String::new(),
            mime_type: "application/octet-stream".into(),
            file_size: 0,
            thumbnail: None,
            downloaded_at: now,
            last_accessed: now,
            sync_status: SyncStatus::Synced,
        }
    }

    /// Sets the file name.
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = mime.into();
        self
    }

    /// Sets the content size.
    #[must_use]
    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    /// Sets the sync status.
    #[must_use]
    pub fn with_sync_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }
}

/// The kind of mutation a queue item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Create a new entity on the server.
    Create,
    /// Update an existing entity.
    Update,
    /// Delete an entity.
    Delete,
}

/// The entity family a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// A document.
    Document,
    /// A tag attached to a document.
    Tag,
    /// A comment on a document.
    Comment,
}

/// Delivery state of a queue item.
///
/// Transitions: `Pending → InFlight → removed` on success,
/// `InFlight → Pending` on transient failure (retry count bumped),
/// `Pending → Failed` once retries are exhausted or the remote reports a
/// permanent error. `Failed` is terminal until an explicit retry/discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    /// Waiting to be sent.
    Pending,
    /// Handed to the remote collaborator, awaiting the outcome.
    InFlight,
    /// Gave up; requires explicit operator action.
    Failed,
}

/// One durable pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Journal-assigned identifier, monotonic, defines FIFO order.
    pub id: u64,
    /// What to do.
    pub operation: Operation,
    /// What family the target belongs to.
    pub entity_kind: EntityKind,
    /// Target entity id; absent for creates without a server id yet.
    pub entity_id: Option<String>,
    /// Opaque structured payload forwarded to the remote collaborator.
    pub payload: serde_json::Value,
    /// When the item was enqueued (unix millis).
    pub enqueued_at: u64,
    /// Number of transient failures so far.
    pub retry_count: u32,
    /// Delivery state.
    pub status: QueueStatus,
}

impl SyncQueueItem {
    /// The idempotency key attached to every remote delivery of this item.
    ///
    /// Derived from the stable item id so a replay after a crash between
    /// remote success and local removal reuses the same key.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        format!("docsync-q{}-{}", self.id, self.enqueued_at)
    }
}
