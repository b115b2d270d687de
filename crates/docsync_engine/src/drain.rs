//! Sequential sync-queue drain.
//!
//! One drain runs at a time (the coordinator guards re-entry). Items are
//! processed strictly in FIFO order by id; interleaving across entities
//! is deliberately not attempted.

use crate::error::RemoteError;
use crate::remote::{RemoteClient, RemoteRequest};
use docsync_store::{LocalStore, QueueStatus, StoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items delivered and removed from the queue.
    pub delivered: u32,
    /// Items returned to pending after a transient failure.
    pub requeued: u32,
    /// Items parked as failed.
    pub parked: u32,
    /// True if the drain stopped early on cancellation.
    pub cancelled: bool,
}

/// Drains every pending queue item once, in FIFO order.
///
/// Per item: the in-flight transition is journaled before dispatch, so a
/// crash after remote success replays the delivery with the same
/// idempotency key instead of losing it. Transient failures (including
/// timeouts) return the item to pending with a retry bump; permanent
/// failures and exhausted retry budgets park it as failed and the drain
/// moves on — one poison item never blocks the rest.
///
/// Cancellation is honored between items, never mid-item.
pub async fn drain_queue<R: RemoteClient>(
    store: &LocalStore,
    remote: &R,
    max_retries: u32,
    request_timeout: Duration,
    cancel: &AtomicBool,
) -> StoreResult<DrainReport> {
    let mut report = DrainReport::default();

    // Items left in-flight by an interrupted drain have an unknown
    // outcome; requeue them and let the idempotency key absorb replays.
    for stuck in store.list_in_flight() {
        debug!(id = stuck.id, "requeueing item left in-flight");
        store.update_status(stuck.id, QueueStatus::Pending, false)?;
    }

    let pending = store.list_pending();
    if pending.is_empty() {
        return Ok(report);
    }
    info!(items = pending.len(), "draining sync queue");

    for item in pending {
        if cancel.load(Ordering::SeqCst) {
            report.cancelled = true;
            break;
        }

        if item.retry_count >= max_retries {
            warn!(id = item.id, retries = item.retry_count, "retries exhausted, parking item");
            store.update_status(item.id, QueueStatus::Failed, false)?;
            report.parked += 1;
            continue;
        }

        store.update_status(item.id, QueueStatus::InFlight, false)?;

        let request = RemoteRequest::from_item(&item);
        let outcome = match tokio::time::timeout(request_timeout, remote.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient("remote call timed out".into())),
        };

        match outcome {
            Ok(_ack) => {
                store.remove_queue_item(item.id)?;
                report.delivered += 1;
            }
            Err(error) if error.is_transient() => {
                if item.retry_count + 1 >= max_retries {
                    warn!(id = item.id, %error, "final transient failure, parking item");
                    store.update_status(item.id, QueueStatus::Failed, true)?;
                    report.parked += 1;
                } else {
                    debug!(id = item.id, %error, "transient failure, requeueing");
                    store.update_status(item.id, QueueStatus::Pending, true)?;
                    report.requeued += 1;
                }
            }
            Err(error) => {
                // Permanent rejection: no retry budget consumed.
                warn!(id = item.id, %error, "permanent failure, parking item");
                store.update_status(item.id, QueueStatus::Failed, false)?;
                report.parked += 1;
            }
        }
    }

    info!(
        delivered = report.delivered,
        requeued = report.requeued,
        parked = report.parked,
        cancelled = report.cancelled,
        "drain finished"
    );
    Ok(report)
}
