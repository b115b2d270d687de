//! LRU eviction bounded by an item budget.

use docsync_store::{LocalStore, StoreResult, SyncStatus};
use tracing::info;

/// Keeps the store's document family within a configured maximum count.
///
/// Strict LRU at record granularity, ordered by `last_accessed`. Records
/// with sync status pending are never evicted: their local mutations have
/// not been delivered yet, so reclaiming them would lose data.
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    budget: usize,
}

impl EvictionPolicy {
    /// Creates a policy with the given item budget.
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    /// The configured budget.
    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Removes the least-recently-used evictable records until the store
    /// is within budget. Returns the removed ids, oldest first.
    pub fn evict(&self, store: &LocalStore) -> StoreResult<Vec<String>> {
        let records = store.list_records();
        if records.len() <= self.budget {
            return Ok(Vec::new());
        }

        let excess = records.len() - self.budget;
        let mut candidates: Vec<_> = records
            .into_iter()
            .filter(|r| r.sync_status != SyncStatus::Pending)
            .collect();
        candidates.sort_by_key(|r| r.last_accessed);

        let mut removed = Vec::with_capacity(excess);
        for record in candidates.into_iter().take(excess) {
            store.remove_record(&record.id)?;
            removed.push(record.id);
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "evicted least-recently-used records");
        }
        Ok(removed)
    }
}
