//! The remote collaborator boundary.
//!
//! The engine needs exactly one operation from the network layer:
//! [`RemoteClient::send`]. Everything else about the document service's
//! HTTP surface belongs to the presentation layer and never crosses this
//! seam.

use crate::error::RemoteError;
use docsync_store::{EntityKind, Operation, SyncQueueItem};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;

/// One mutation delivery to the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    /// What to do.
    pub operation: Operation,
    /// Which entity family.
    pub entity_kind: EntityKind,
    /// Target entity id; absent for creates without a server id.
    pub entity_id: Option<String>,
    /// Opaque structured payload.
    pub payload: serde_json::Value,
    /// Stable key making repeated delivery side-effect free.
    pub idempotency_key: String,
}

impl RemoteRequest {
    /// Builds the delivery for a queued item, reusing its stable
    /// idempotency key.
    #[must_use]
    pub fn from_item(item: &SyncQueueItem) -> Self {
        Self {
            operation: item.operation,
            entity_kind: item.entity_kind,
            entity_id: item.entity_id.clone(),
            payload: item.payload.clone(),
            idempotency_key: item.idempotency_key(),
        }
    }
}

/// Acknowledgement of a delivered mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteAck {
    /// Server-assigned id, present for creates.
    pub server_id: Option<String>,
}

/// Network client for mutation delivery.
///
/// Implementations must make `send` safe to repeat with the same
/// idempotency key: a drain interrupted between remote success and local
/// queue removal will replay the delivery.
pub trait RemoteClient: Send + Sync + 'static {
    /// Delivers one mutation, classifying failures as transient or
    /// permanent.
    fn send(
        &self,
        request: RemoteRequest,
    ) -> impl Future<Output = Result<RemoteAck, RemoteError>> + Send;
}

#[derive(Default)]
struct MockState {
    online: bool,
    stalled: bool,
    calls: Vec<RemoteRequest>,
    applied: Vec<RemoteRequest>,
    seen_keys: HashSet<String>,
    duplicate_hits: u32,
    fail_entities: HashMap<String, RemoteError>,
    fail_next: VecDeque<RemoteError>,
    next_server_id: u64,
}

/// A scriptable in-memory collaborator for tests.
///
/// Records every delivery attempt, applies side effects at most once per
/// idempotency key, and can be scripted to fail per entity or per call.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    /// Creates a mock that is online and succeeds every call.
    #[must_use]
    pub fn new() -> Self {
        let mock = Self::default();
        mock.state.lock().online = true;
        mock
    }

    /// Toggles reachability. While offline every call fails transient.
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    /// When stalled, calls never complete (exercises caller timeouts).
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Scripts every delivery targeting `entity_id` to fail with `error`.
    pub fn fail_entity(&self, entity_id: impl Into<String>, error: RemoteError) {
        self.state.lock().fail_entities.insert(entity_id.into(), error);
    }

    /// Stops failing deliveries for `entity_id`.
    pub fn clear_entity_failure(&self, entity_id: &str) {
        self.state.lock().fail_entities.remove(entity_id);
    }

    /// Scripts the next calls, in order, to fail with the given errors.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state.lock().fail_next.extend(errors);
    }

    /// Every delivery attempt, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.state.lock().calls.clone()
    }

    /// Deliveries whose side effect was applied (first arrival per key).
    #[must_use]
    pub fn applied(&self) -> Vec<RemoteRequest> {
        self.state.lock().applied.clone()
    }

    /// Number of deliveries absorbed as duplicates of an earlier key.
    #[must_use]
    pub fn duplicate_hits(&self) -> u32 {
        self.state.lock().duplicate_hits
    }
}

impl RemoteClient for MockRemote {
    fn send(
        &self,
        request: RemoteRequest,
    ) -> impl Future<Output = Result<RemoteAck, RemoteError>> + Send {
        async move {
            let stalled = {
                let mut state = self.state.lock();
                state.calls.push(request.clone());
                state.stalled
            };
            if stalled {
                // Never resolves; the caller's timeout fires instead.
                std::future::pending::<()>().await;
            }

            let mut state = self.state.lock();
            if !state.online {
                return Err(RemoteError::Transient("network unreachable".into()));
            }
            if let Some(error) = state.fail_next.pop_front() {
                return Err(error);
            }
            if let Some(id) = &request.entity_id {
                if let Some(error) = state.fail_entities.get(id) {
                    return Err(error.clone());
                }
            }

            if state.seen_keys.contains(&request.idempotency_key) {
                // Idempotent replay: acknowledged, no new side effect.
                state.duplicate_hits += 1;
                return Ok(RemoteAck::default());
            }

            state.seen_keys.insert(request.idempotency_key.clone());
            let server_id = if request.operation == Operation::Create {
                state.next_server_id += 1;
                Some(format!("srv-{}", state.next_server_id))
            } else {
                None
            };
            state.applied.push(request);
            Ok(RemoteAck { server_id })
        }
    }
}
