//! The background coordinator and the foreground engine handle.
//!
//! The coordinator is a long-lived task that outlives any single view:
//! it owns the sync-queue drain, reacts to connectivity transitions, and
//! runs the optional safety-net drain interval. Foreground contexts talk
//! to it exclusively through the clonable [`EngineHandle`] — message
//! passing with reply channels, never shared call stacks.

use crate::cache::{CacheFetcher, CacheLayer, CachedResponse};
use crate::config::EngineConfig;
use crate::connectivity::ConnectivitySignal;
use crate::drain::{drain_queue, DrainReport};
use crate::error::{EngineError, EngineResult};
use crate::eviction::EvictionPolicy;
use crate::remote::{RemoteClient, RemoteRequest};
use bytes::Bytes;
use docsync_store::{
    EntityKind, LocalStore, OfflineRecord, Operation, QueueStatus, StoreStats,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Aggregate queue state for a status indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatusSummary {
    /// Items waiting to be delivered.
    pub pending: u32,
    /// Items parked after exhausting retries or a permanent rejection.
    pub failed: u32,
    /// All queue items.
    pub total: u32,
    /// True while a drain is running.
    pub is_syncing: bool,
}

/// Local storage usage for a status display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    /// Offline records held.
    pub documents_count: u32,
    /// Bytes held in file blobs.
    pub files_bytes: u64,
    /// Queue items held.
    pub queue_count: u32,
}

/// How a mutation intake was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Delivered directly; carries the server id for creates.
    Applied {
        /// Server-assigned id, present for creates.
        server_id: Option<String>,
    },
    /// Durably enqueued for a later drain.
    Queued {
        /// The queue item id.
        item_id: u64,
    },
}

enum Command {
    QueueMutation {
        operation: Operation,
        entity_kind: EntityKind,
        entity_id: Option<String>,
        payload: serde_json::Value,
        reply: oneshot::Sender<EngineResult<MutationOutcome>>,
    },
    MarkForOffline {
        record: OfflineRecord,
        blob: Option<Bytes>,
        reply: oneshot::Sender<EngineResult<Vec<String>>>,
    },
    RemoveOffline {
        id: String,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    RetryFailed {
        id: u64,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    DiscardFailed {
        id: u64,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    ClearAll {
        reply: oneshot::Sender<EngineResult<()>>,
    },
    DrainNow {
        reply: oneshot::Sender<DrainReport>,
    },
    Shutdown,
}

/// The engine: constructs the coordinator and hands out the foreground
/// handle. No global singleton; everything is dependency-injected here.
pub struct Engine;

impl Engine {
    /// Spawns the background coordinator and returns the handle.
    ///
    /// Must be called within a tokio runtime.
    pub fn start<R, F>(
        config: EngineConfig,
        store: Arc<LocalStore>,
        remote: Arc<R>,
        fetcher: Arc<F>,
        connectivity: ConnectivitySignal,
    ) -> EngineHandle<F>
    where
        R: RemoteClient,
        F: CacheFetcher,
    {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity);
        let is_syncing = Arc::new(AtomicBool::new(false));
        let cache = Arc::new(CacheLayer::new(
            Arc::clone(&fetcher),
            config.cache_policies.clone(),
            connectivity.clone(),
            config.request_timeout,
        ));

        let coordinator = Coordinator {
            config,
            store: Arc::clone(&store),
            remote,
            connectivity: connectivity.clone(),
            is_syncing: Arc::clone(&is_syncing),
            shutting_down: Arc::new(AtomicBool::new(false)),
        };
        let task = tokio::spawn(coordinator.run(rx));

        EngineHandle {
            tx,
            store,
            cache,
            is_syncing,
            task: Arc::new(parking_lot::Mutex::new(Some(task))),
        }
    }
}

struct Coordinator<R: RemoteClient> {
    config: EngineConfig,
    store: Arc<LocalStore>,
    remote: Arc<R>,
    connectivity: ConnectivitySignal,
    is_syncing: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
}

impl<R: RemoteClient> Coordinator<R> {
    async fn run(self, mut rx: mpsc::Receiver<Command>) {
        let mut conn_rx = self.connectivity.subscribe();
        let mut was_online = *conn_rx.borrow();
        let mut interval = self
            .config
            .drain_interval
            .map(|period| {
                let mut timer = tokio::time::interval(period);
                timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // Skip the immediate first tick.
                timer.reset();
                timer
            });

        info!(online = was_online, "coordinator started");
        if was_online {
            self.drain().await;
        }

        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle(command).await,
                    }
                }
                changed = conn_rx.changed() => {
                    if changed.is_err() {
                        // Signal owner dropped; keep serving commands.
                        continue;
                    }
                    let online = *conn_rx.borrow_and_update();
                    if online && !was_online {
                        info!("connectivity restored, draining");
                        self.drain().await;
                    }
                    was_online = online;
                }
                _ = async {
                    match interval.as_mut() {
                        Some(timer) => { timer.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if self.connectivity.is_online() {
                        self.drain().await;
                    }
                }
            }
        }

        self.shutting_down.store(true, Ordering::SeqCst);
        info!("coordinator stopped");
    }

    async fn handle(&self, command: Command) {
        match command {
            Command::QueueMutation {
                operation,
                entity_kind,
                entity_id,
                payload,
                reply,
            } => {
                let result = self
                    .intake_mutation(operation, entity_kind, entity_id, payload)
                    .await;
                let _ = reply.send(result);
            }
            Command::MarkForOffline {
                record,
                blob,
                reply,
            } => {
                let result = self.mark_for_offline(record, blob);
                let _ = reply.send(result);
            }
            Command::RemoveOffline { id, reply } => {
                let _ = reply.send(self.store.remove_record(&id).map_err(EngineError::from));
            }
            Command::RetryFailed { id, reply } => {
                let _ = reply.send(self.store.requeue_failed(id).map_err(EngineError::from));
            }
            Command::DiscardFailed { id, reply } => {
                let _ = reply.send(self.store.remove_queue_item(id).map_err(EngineError::from));
            }
            Command::ClearAll { reply } => {
                let _ = reply.send(self.store.clear_all().map_err(EngineError::from));
            }
            Command::DrainNow { reply } => {
                let report = self.drain().await;
                let _ = reply.send(report);
            }
            Command::Shutdown => {}
        }
    }

    /// Mutation intake: durably enqueue, then attempt immediate delivery
    /// when nothing is ahead of it.
    ///
    /// Enqueue-first keeps the idempotency key stable if the process dies
    /// mid-attempt, and the nothing-ahead condition preserves per-entity
    /// FIFO while a backlog exists.
    async fn intake_mutation(
        &self,
        operation: Operation,
        entity_kind: EntityKind,
        entity_id: Option<String>,
        payload: serde_json::Value,
    ) -> EngineResult<MutationOutcome> {
        let backlog = !self.store.list_pending().is_empty();
        let item = self
            .store
            .enqueue(operation, entity_kind, entity_id, payload)?;

        if backlog || !self.connectivity.is_online() {
            return Ok(MutationOutcome::Queued { item_id: item.id });
        }

        self.store
            .update_status(item.id, QueueStatus::InFlight, false)?;
        let request = RemoteRequest::from_item(&item);
        let outcome =
            match tokio::time::timeout(self.config.request_timeout, self.remote.send(request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(crate::error::RemoteError::Transient(
                    "remote call timed out".into(),
                )),
            };

        match outcome {
            Ok(ack) => {
                self.store.remove_queue_item(item.id)?;
                Ok(MutationOutcome::Applied {
                    server_id: ack.server_id,
                })
            }
            Err(error) if error.is_transient() => {
                // Connectivity-attributable: leave it queued for the drain.
                self.store
                    .update_status(item.id, QueueStatus::Pending, false)?;
                Ok(MutationOutcome::Queued { item_id: item.id })
            }
            Err(permanent) => {
                // Validation failure: surfaced to the caller, not retried.
                self.store.remove_queue_item(item.id)?;
                Err(EngineError::Remote(permanent))
            }
        }
    }

    fn mark_for_offline(
        &self,
        record: OfflineRecord,
        blob: Option<Bytes>,
    ) -> EngineResult<Vec<String>> {
        self.store.put_record(record, blob)?;
        let evicted = EvictionPolicy::new(self.config.eviction_budget).evict(&self.store)?;
        Ok(evicted)
    }

    async fn drain(&self) -> DrainReport {
        if self.is_syncing.swap(true, Ordering::SeqCst) {
            // A drain is already running; re-entrant triggers are no-ops.
            return DrainReport::default();
        }
        let report = drain_queue(
            self.store.as_ref(),
            self.remote.as_ref(),
            self.config.max_retries,
            self.config.request_timeout,
            self.shutting_down.as_ref(),
        )
        .await;
        self.is_syncing.store(false, Ordering::SeqCst);

        match report {
            Ok(report) => report,
            Err(e) => {
                // Queue errors stay out of the foreground; they surface
                // through sync_status() counts.
                error!(error = %e, "drain aborted on store failure");
                DrainReport::default()
            }
        }
    }
}

/// Clonable foreground handle to the engine.
///
/// Mutations and drain control go through the coordinator mailbox;
/// status queries read the store directly (reads never block on the
/// background context).
pub struct EngineHandle<F> {
    tx: mpsc::Sender<Command>,
    store: Arc<LocalStore>,
    cache: Arc<CacheLayer<F>>,
    is_syncing: Arc<AtomicBool>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl<F> Clone for EngineHandle<F> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            is_syncing: Arc::clone(&self.is_syncing),
            task: Arc::clone(&self.task),
        }
    }
}

impl<F: CacheFetcher> EngineHandle<F> {
    async fn send_command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> EngineResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ShuttingDown)?;
        reply_rx.await.map_err(|_| EngineError::ShuttingDown)
    }

    /// Submits a mutation: delivered directly when possible, otherwise
    /// durably queued for the next drain.
    pub async fn queue_mutation(
        &self,
        operation: Operation,
        entity_kind: EntityKind,
        entity_id: Option<String>,
        payload: serde_json::Value,
    ) -> EngineResult<MutationOutcome> {
        self.send_command(|reply| Command::QueueMutation {
            operation,
            entity_kind,
            entity_id,
            payload,
            reply,
        })
        .await?
    }

    /// Marks a document for offline availability, storing its record and
    /// blob and running eviction. Returns any evicted document ids.
    pub async fn mark_for_offline(
        &self,
        record: OfflineRecord,
        blob: Option<Bytes>,
    ) -> EngineResult<Vec<String>> {
        self.send_command(|reply| Command::MarkForOffline {
            record,
            blob,
            reply,
        })
        .await?
    }

    /// Removes a document (and its blob) from offline availability.
    pub async fn remove_offline(&self, id: impl Into<String>) -> EngineResult<()> {
        self.send_command(|reply| Command::RemoveOffline {
            id: id.into(),
            reply,
        })
        .await?
    }

    /// Explicitly returns a failed queue item to pending.
    pub async fn retry_failed(&self, id: u64) -> EngineResult<()> {
        self.send_command(|reply| Command::RetryFailed { id, reply }).await?
    }

    /// Explicitly discards a failed queue item.
    pub async fn discard_failed(&self, id: u64) -> EngineResult<()> {
        self.send_command(|reply| Command::DiscardFailed { id, reply }).await?
    }

    /// Wipes all offline state: records, blobs, queue, and cache.
    pub async fn clear_all(&self) -> EngineResult<()> {
        self.cache.clear();
        self.send_command(|reply| Command::ClearAll { reply }).await?
    }

    /// Requests a drain pass and waits for its report.
    pub async fn drain_now(&self) -> EngineResult<DrainReport> {
        self.send_command(|reply| Command::DrainNow { reply }).await
    }

    /// Reads a path through the cache strategy layer.
    pub async fn read(&self, path: &str) -> EngineResult<CachedResponse> {
        self.cache.read(path).await
    }

    /// The cache layer, for priming and invalidation.
    #[must_use]
    pub fn cache(&self) -> &CacheLayer<F> {
        &self.cache
    }

    /// Queue counts for a status indicator.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatusSummary {
        let stats = self.store.stats();
        SyncStatusSummary {
            pending: stats.queue_pending,
            failed: stats.queue_failed,
            total: stats.queue_total,
            is_syncing: self.is_syncing.load(Ordering::SeqCst),
        }
    }

    /// Local storage usage.
    #[must_use]
    pub fn storage_stats(&self) -> StorageUsage {
        let stats: StoreStats = self.store.stats();
        StorageUsage {
            documents_count: stats.documents,
            files_bytes: stats.blob_bytes,
            queue_count: stats.queue_total,
        }
    }

    /// True if the document is available offline.
    ///
    /// A status probe, not a read: the record's access time is untouched.
    #[must_use]
    pub fn is_document_offline(&self, id: &str) -> bool {
        self.store.peek_record(id).is_some()
    }

    /// Failed items awaiting an explicit retry or discard.
    #[must_use]
    pub fn failed_items(&self) -> Vec<docsync_store::SyncQueueItem> {
        self.store.list_failed()
    }

    /// Stops the coordinator and waits for it to finish.
    pub async fn shutdown(&self) -> EngineResult<()> {
        let _ = self.tx.send(Command::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "coordinator task join failed");
            }
        }
        Ok(())
    }
}
