//! The local store: durable record families behind narrow verbs.

use crate::backend::{FileBackend, InMemoryBackend, StorageBackend};
use crate::error::StoreResult;
use crate::journal::{Journal, JournalRecord};
use crate::types::{
    now_millis, EntityKind, OfflineRecord, Operation, QueueStatus, SyncQueueItem,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Configuration for the local store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Journal size above which a compaction is attempted after a
    /// mutating verb.
    pub compact_threshold_bytes: u64,
}

impl StoreConfig {
    /// Sets the compaction threshold.
    #[must_use]
    pub fn with_compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold_bytes = bytes;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compact_threshold_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Counters describing the store's current contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of offline records.
    pub documents: u32,
    /// Total bytes held in file blobs.
    pub blob_bytes: u64,
    /// Queue items with status pending.
    pub queue_pending: u32,
    /// Queue items with status failed.
    pub queue_failed: u32,
    /// All queue items regardless of status.
    pub queue_total: u32,
    /// Current journal size in bytes.
    pub journal_bytes: u64,
}

/// In-memory image of the journal, rebuilt on open.
#[derive(Default)]
struct State {
    documents: HashMap<String, OfflineRecord>,
    blobs: HashMap<String, Bytes>,
    queue: BTreeMap<u64, SyncQueueItem>,
    next_queue_id: u64,
}

impl State {
    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::PutDocument { record, blob } => {
                if let Some(blob) = blob {
                    self.blobs.insert(record.id.clone(), blob);
                }
                self.documents.insert(record.id.clone(), record);
            }
            JournalRecord::Touch { id, at } => {
                if let Some(doc) = self.documents.get_mut(&id) {
                    doc.last_accessed = doc.last_accessed.max(at);
                }
            }
            JournalRecord::RemoveDocument { id } => {
                self.documents.remove(&id);
                self.blobs.remove(&id);
            }
            JournalRecord::Enqueue { item } => {
                self.next_queue_id = self.next_queue_id.max(item.id + 1);
                self.queue.insert(item.id, item);
            }
            JournalRecord::QueueUpdate {
                id,
                status,
                retry_count,
            } => {
                if let Some(item) = self.queue.get_mut(&id) {
                    item.status = status;
                    item.retry_count = retry_count;
                }
            }
            JournalRecord::QueueRemove { id } => {
                self.queue.remove(&id);
            }
            JournalRecord::Clear => {
                self.documents.clear();
                self.blobs.clear();
                self.queue.clear();
            }
        }
    }

    /// Journal records reproducing the live state, for compaction.
    fn snapshot(&self) -> Vec<JournalRecord> {
        let mut records = Vec::with_capacity(self.documents.len() + self.queue.len());
        for doc in self.documents.values() {
            records.push(JournalRecord::PutDocument {
                record: doc.clone(),
                blob: self.blobs.get(&doc.id).cloned(),
            });
        }
        for item in self.queue.values() {
            records.push(JournalRecord::Enqueue { item: item.clone() });
        }
        records
    }
}

struct Inner {
    journal: Journal,
    state: State,
    config: StoreConfig,
}

/// Durable, crash-consistent storage for offline records, blobs, and the
/// sync queue.
///
/// All verbs are thread-safe; writes to the same id serialize on the
/// store's internal lock, with last-write-wins at the journal. Every
/// mutating verb is synced to durable media before it returns.
pub struct LocalStore {
    inner: Mutex<Inner>,
}

impl LocalStore {
    /// Opens a file-backed store at `path`, replaying any existing journal.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens a file-backed store with explicit configuration.
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        Self::with_backend(Box::new(FileBackend::open(path.as_ref())?), config)
    }

    /// Opens an ephemeral in-memory store, for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_backend(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Opens a store over an arbitrary backend.
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let mut journal = Journal::new(backend);
        let mut state = State::default();
        let records = journal.replay()?;
        let replayed = records.len();
        for record in records {
            state.apply(record);
        }
        info!(
            replayed,
            documents = state.documents.len(),
            queue = state.queue.len(),
            "store opened"
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                journal,
                state,
                config,
            }),
        })
    }

    /// Upserts a record and, if given, its blob, as one atomic unit.
    ///
    /// Sets `downloaded_at` and `last_accessed` to now. The write is
    /// durable before this returns.
    pub fn put_record(&self, mut record: OfflineRecord, blob: Option<Bytes>) -> StoreResult<()> {
        let now = now_millis();
        record.downloaded_at = now;
        record.last_accessed = now;

        let mut inner = self.inner.lock();
        inner.journal.append_sync(&JournalRecord::PutDocument {
            record: record.clone(),
            blob: blob.clone(),
        })?;
        inner.state.apply(JournalRecord::PutDocument { record, blob });
        Ok(())
    }

    /// Reads a record, bumping its `last_accessed` time as a side effect.
    ///
    /// The bump is journaled so eviction order survives a restart, but the
    /// read itself never fails: if the touch cannot be persisted the stale
    /// access time is tolerated.
    pub fn get_record(&self, id: &str) -> Option<OfflineRecord> {
        let mut inner = self.inner.lock();
        if !inner.state.documents.contains_key(id) {
            return None;
        }

        let at = now_millis();
        let touch = JournalRecord::Touch {
            id: id.to_string(),
            at,
        };
        if let Err(e) = inner.journal.append_sync(&touch) {
            warn!(id, error = %e, "failed to persist access-time bump");
        }
        inner.state.apply(touch);
        inner.state.documents.get(id).cloned()
    }

    /// Reads a record without touching its access time.
    pub fn peek_record(&self, id: &str) -> Option<OfflineRecord> {
        self.inner.lock().state.documents.get(id).cloned()
    }

    /// Reads the blob for a document, if any.
    pub fn get_blob(&self, id: &str) -> Option<Bytes> {
        self.inner.lock().state.blobs.get(id).cloned()
    }

    /// Enumerates all offline records.
    pub fn list_records(&self) -> Vec<OfflineRecord> {
        self.inner.lock().state.documents.values().cloned().collect()
    }

    /// Removes a record and its blob together.
    ///
    /// Idempotent: removing an id that does not exist succeeds silently
    /// without a journal write.
    pub fn remove_record(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.documents.contains_key(id) {
            return Ok(());
        }
        let record = JournalRecord::RemoveDocument { id: id.to_string() };
        inner.journal.append_sync(&record)?;
        inner.state.apply(record);
        Self::maybe_compact(&mut inner)
    }

    /// Adds a mutation to the sync queue, assigning it the next id.
    ///
    /// Returns the stored item. Durable before return: an enqueued item
    /// survives process restart.
    pub fn enqueue(
        &self,
        operation: Operation,
        entity_kind: EntityKind,
        entity_id: Option<String>,
        payload: serde_json::Value,
    ) -> StoreResult<SyncQueueItem> {
        let mut inner = self.inner.lock();
        let id = inner.state.next_queue_id.max(1);
        let item = SyncQueueItem {
            id,
            operation,
            entity_kind,
            entity_id,
            payload,
            enqueued_at: now_millis(),
            retry_count: 0,
            status: QueueStatus::Pending,
        };
        inner
            .journal
            .append_sync(&JournalRecord::Enqueue { item: item.clone() })?;
        inner.state.apply(JournalRecord::Enqueue { item: item.clone() });
        Ok(item)
    }

    /// Queue items with status pending, in FIFO (id) order.
    pub fn list_pending(&self) -> Vec<SyncQueueItem> {
        self.inner
            .lock()
            .state
            .queue
            .values()
            .filter(|i| i.status == QueueStatus::Pending)
            .cloned()
            .collect()
    }

    /// Queue items stuck in-flight, in id order.
    ///
    /// Non-empty only after a crash between dispatch and the recorded
    /// outcome; the drain requeues these before processing.
    pub fn list_in_flight(&self) -> Vec<SyncQueueItem> {
        self.inner
            .lock()
            .state
            .queue
            .values()
            .filter(|i| i.status == QueueStatus::InFlight)
            .cloned()
            .collect()
    }

    /// Queue items parked as failed, in id order.
    pub fn list_failed(&self) -> Vec<SyncQueueItem> {
        self.inner
            .lock()
            .state
            .queue
            .values()
            .filter(|i| i.status == QueueStatus::Failed)
            .cloned()
            .collect()
    }

    /// Reads a single queue item.
    pub fn get_queue_item(&self, id: u64) -> Option<SyncQueueItem> {
        self.inner.lock().state.queue.get(&id).cloned()
    }

    /// Changes a queue item's status, optionally bumping its retry count.
    ///
    /// Unknown ids succeed silently, mirroring `remove_record`.
    pub fn update_status(&self, id: u64, status: QueueStatus, bump_retry: bool) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let Some(current) = inner.state.queue.get(&id) else {
            return Ok(());
        };
        let retry_count = current.retry_count + u32::from(bump_retry);
        let record = JournalRecord::QueueUpdate {
            id,
            status,
            retry_count,
        };
        inner.journal.append_sync(&record)?;
        inner.state.apply(record);
        Ok(())
    }

    /// Returns a failed item to pending with a fresh retry budget.
    ///
    /// This is the explicit operator action; failed items never re-enter
    /// the queue on their own. A non-failed or unknown id is a no-op.
    pub fn requeue_failed(&self, id: u64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.state.queue.get(&id) {
            Some(item) if item.status == QueueStatus::Failed => {}
            _ => return Ok(()),
        }
        let record = JournalRecord::QueueUpdate {
            id,
            status: QueueStatus::Pending,
            retry_count: 0,
        };
        inner.journal.append_sync(&record)?;
        inner.state.apply(record);
        Ok(())
    }

    /// Removes a queue item after confirmed delivery or explicit discard.
    pub fn remove_queue_item(&self, id: u64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.queue.contains_key(&id) {
            return Ok(());
        }
        let record = JournalRecord::QueueRemove { id };
        inner.journal.append_sync(&record)?;
        inner.state.apply(record);
        Self::maybe_compact(&mut inner)
    }

    /// Wipes all three families and resets the journal.
    pub fn clear_all(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.journal.rewrite(&[])?;
        inner.state = State::default();
        info!("store cleared");
        Ok(())
    }

    /// Current contents counters.
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        let queue_total = inner.state.queue.len() as u32;
        let queue_pending = inner
            .state
            .queue
            .values()
            .filter(|i| i.status == QueueStatus::Pending)
            .count() as u32;
        let queue_failed = inner
            .state
            .queue
            .values()
            .filter(|i| i.status == QueueStatus::Failed)
            .count() as u32;
        StoreStats {
            documents: inner.state.documents.len() as u32,
            blob_bytes: inner.state.blobs.values().map(|b| b.len() as u64).sum(),
            queue_pending,
            queue_failed,
            queue_total,
            journal_bytes: inner.journal.len(),
        }
    }

    /// Rewrites the journal down to a snapshot of live state.
    pub fn compact(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::compact_inner(&mut inner)
    }

    fn compact_inner(inner: &mut Inner) -> StoreResult<()> {
        let before = inner.journal.len();
        let snapshot = inner.state.snapshot();
        inner.journal.rewrite(&snapshot)?;
        debug!(before, after = inner.journal.len(), "journal compacted");
        Ok(())
    }

    fn maybe_compact(inner: &mut Inner) -> StoreResult<()> {
        if inner.journal.len() > inner.config.compact_threshold_bytes {
            Self::compact_inner(inner)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("LocalStore").field("stats", &stats).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> LocalStore {
        LocalStore::open_in_memory().unwrap()
    }

    fn record(id: &str) -> OfflineRecord {
        OfflineRecord::new(id, format!("title for {id}"))
            .with_file_name(format!("{id}.pdf"))
            .with_mime_type("application/pdf")
    }

    #[test]
    fn put_and_get_record_with_blob() {
        let store = store();
        store
            .put_record(record("doc-1"), Some(Bytes::from_static(b"pdf bytes")))
            .unwrap();

        let got = store.get_record("doc-1").unwrap();
        assert_eq!(got.id, "doc-1");
        assert_eq!(store.get_blob("doc-1").unwrap(), &b"pdf bytes"[..]);
        assert!(store.get_record("doc-404").is_none());
    }

    #[test]
    fn get_record_bumps_last_accessed_monotonically() {
        let store = store();
        store.put_record(record("doc-1"), None).unwrap();
        let first = store.get_record("doc-1").unwrap().last_accessed;
        let second = store.get_record("doc-1").unwrap().last_accessed;
        assert!(second >= first);
        // peek does not touch
        let peeked = store.peek_record("doc-1").unwrap().last_accessed;
        assert_eq!(peeked, second.max(peeked));
    }

    #[test]
    fn remove_record_cascades_blob_and_is_idempotent() {
        let store = store();
        store
            .put_record(record("doc-1"), Some(Bytes::from_static(b"x")))
            .unwrap();
        store.remove_record("doc-1").unwrap();
        assert!(store.peek_record("doc-1").is_none());
        assert!(store.get_blob("doc-1").is_none());
        // Removing again succeeds silently.
        store.remove_record("doc-1").unwrap();
    }

    #[test]
    fn enqueue_assigns_monotonic_ids() {
        let store = store();
        let a = store
            .enqueue(
                Operation::Update,
                EntityKind::Document,
                Some("doc-1".into()),
                serde_json::json!({"title": "a"}),
            )
            .unwrap();
        let b = store
            .enqueue(
                Operation::Delete,
                EntityKind::Document,
                Some("doc-1".into()),
                serde_json::json!({}),
            )
            .unwrap();
        assert!(b.id > a.id);

        let pending = store.list_pending();
        assert_eq!(pending.iter().map(|i| i.id).collect::<Vec<_>>(), vec![a.id, b.id]);
    }

    #[test]
    fn update_status_transitions() {
        let store = store();
        let item = store
            .enqueue(
                Operation::Create,
                EntityKind::Tag,
                None,
                serde_json::json!({"name": "x"}),
            )
            .unwrap();

        store
            .update_status(item.id, QueueStatus::InFlight, false)
            .unwrap();
        assert_eq!(
            store.get_queue_item(item.id).unwrap().status,
            QueueStatus::InFlight
        );
        assert!(store.list_pending().is_empty());

        store
            .update_status(item.id, QueueStatus::Pending, true)
            .unwrap();
        let back = store.get_queue_item(item.id).unwrap();
        assert_eq!(back.status, QueueStatus::Pending);
        assert_eq!(back.retry_count, 1);

        store
            .update_status(item.id, QueueStatus::Failed, false)
            .unwrap();
        assert_eq!(store.list_failed().len(), 1);
        assert!(store.list_pending().is_empty());

        // Unknown id is a silent no-op.
        store.update_status(999, QueueStatus::Failed, true).unwrap();
    }

    #[test]
    fn requeue_failed_resets_retry_budget() {
        let store = store();
        let item = store
            .enqueue(
                Operation::Update,
                EntityKind::Document,
                Some("doc-1".into()),
                serde_json::json!({}),
            )
            .unwrap();
        store.update_status(item.id, QueueStatus::Pending, true).unwrap();
        store.update_status(item.id, QueueStatus::Pending, true).unwrap();
        store.update_status(item.id, QueueStatus::Failed, false).unwrap();

        store.requeue_failed(item.id).unwrap();
        let back = store.get_queue_item(item.id).unwrap();
        assert_eq!(back.status, QueueStatus::Pending);
        assert_eq!(back.retry_count, 0);

        // Only failed items are eligible.
        store.requeue_failed(item.id).unwrap();
        assert_eq!(store.get_queue_item(item.id).unwrap().status, QueueStatus::Pending);
        store.requeue_failed(12345).unwrap();
    }

    #[test]
    fn stats_reflect_contents() {
        let store = store();
        store
            .put_record(record("doc-1"), Some(Bytes::from(vec![0u8; 100])))
            .unwrap();
        store.put_record(record("doc-2"), None).unwrap();
        let item = store
            .enqueue(
                Operation::Update,
                EntityKind::Document,
                Some("doc-1".into()),
                serde_json::json!({}),
            )
            .unwrap();
        store.update_status(item.id, QueueStatus::Failed, false).unwrap();

        let stats = store.stats();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.blob_bytes, 100);
        assert_eq!(stats.queue_total, 1);
        assert_eq!(stats.queue_pending, 0);
        assert_eq!(stats.queue_failed, 1);
        assert!(stats.journal_bytes > 0);
    }

    #[test]
    fn durability_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");

        {
            let store = LocalStore::open(&path).unwrap();
            store
                .put_record(record("doc-1"), Some(Bytes::from_static(b"body")))
                .unwrap();
            store
                .enqueue(
                    Operation::Update,
                    EntityKind::Document,
                    Some("doc-1".into()),
                    serde_json::json!({"title": "Q3 Report"}),
                )
                .unwrap();
        }

        let store = LocalStore::open(&path).unwrap();
        let got = store.peek_record("doc-1").unwrap();
        assert_eq!(got.title, "title for doc-1");
        assert_eq!(store.get_blob("doc-1").unwrap(), &b"body"[..]);
        let pending = store.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload["title"], "Q3 Report");
    }

    #[test]
    fn access_order_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");

        {
            let store = LocalStore::open(&path).unwrap();
            store.put_record(record("doc-1"), None).unwrap();
            store.put_record(record("doc-2"), None).unwrap();
            // Touch doc-1 so it becomes the most recently used.
            std::thread::sleep(std::time::Duration::from_millis(5));
            store.get_record("doc-1").unwrap();
        }

        let store = LocalStore::open(&path).unwrap();
        let one = store.peek_record("doc-1").unwrap();
        let two = store.peek_record("doc-2").unwrap();
        assert!(one.last_accessed > two.last_accessed);
    }

    #[test]
    fn queue_ids_continue_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");

        let first_id = {
            let store = LocalStore::open(&path).unwrap();
            store
                .enqueue(Operation::Create, EntityKind::Comment, None, serde_json::json!({}))
                .unwrap()
                .id
        };

        let store = LocalStore::open(&path).unwrap();
        let second = store
            .enqueue(Operation::Create, EntityKind::Comment, None, serde_json::json!({}))
            .unwrap();
        assert!(second.id > first_id);
    }

    #[test]
    fn clear_all_wipes_everything() {
        let store = store();
        store.put_record(record("doc-1"), Some(Bytes::from_static(b"x"))).unwrap();
        store
            .enqueue(Operation::Delete, EntityKind::Document, Some("doc-1".into()), serde_json::json!({}))
            .unwrap();

        store.clear_all().unwrap();
        let stats = store.stats();
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.queue_total, 0);
        assert_eq!(stats.journal_bytes, 0);
    }

    #[test]
    fn compaction_shrinks_journal_and_preserves_state() {
        let store = LocalStore::with_backend(
            Box::new(crate::backend::InMemoryBackend::new()),
            StoreConfig::default().with_compact_threshold(1),
        )
        .unwrap();

        store.put_record(record("doc-1"), Some(Bytes::from_static(b"keep"))).unwrap();
        let kept = store
            .enqueue(
                Operation::Update,
                EntityKind::Document,
                Some("doc-1".into()),
                serde_json::json!({"title": "keep"}),
            )
            .unwrap();
        for i in 0..20 {
            store.put_record(record(&format!("tmp-{i}")), None).unwrap();
            // Threshold of 1 byte forces a compaction on every removal.
            store.remove_record(&format!("tmp-{i}")).unwrap();
        }

        let stats = store.stats();
        assert_eq!(stats.documents, 1);
        assert_eq!(store.get_blob("doc-1").unwrap(), &b"keep"[..]);
        assert_eq!(store.get_queue_item(kept.id).unwrap().payload["title"], "keep");
    }

    #[test]
    fn explicit_compact_on_disk_reopens_clean() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");

        {
            let store = LocalStore::open(&path).unwrap();
            for i in 0..10 {
                store.put_record(record(&format!("doc-{i}")), None).unwrap();
            }
            for i in 0..9 {
                store.remove_record(&format!("doc-{i}")).unwrap();
            }
            let before = store.stats().journal_bytes;
            store.compact().unwrap();
            assert!(store.stats().journal_bytes < before);
        }

        let store = LocalStore::open(&path).unwrap();
        assert_eq!(store.stats().documents, 1);
        assert!(store.peek_record("doc-9").is_some());
    }
}
