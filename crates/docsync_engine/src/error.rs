//! Error types for the engine and the remote boundary.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the remote collaborator.
///
/// The classification drives queue behavior: transient errors return the
/// item to pending with a retry bump, permanent errors park it as failed
/// without consuming retry budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network unreachable, timeout, or a 5xx from the server.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The server rejected the request as invalid (4xx). Retrying the
    /// same payload cannot succeed.
    #[error("permanent remote failure: {0}")]
    Permanent(String),
}

impl RemoteError {
    /// Returns true if the operation may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Errors surfaced to engine callers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Disconnected with no cached data to fall back to. Distinguishable
    /// from not-found so callers can render distinct UI.
    #[error("offline with no cached data")]
    Offline,

    /// Local store failure.
    #[error(transparent)]
    Store(#[from] docsync_store::StoreError),

    /// A remote failure that propagates to the caller (a permanent
    /// rejection of a directly attempted mutation).
    #[error("remote rejected the request: {0}")]
    Remote(RemoteError),

    /// The coordinator has shut down and can no longer accept requests.
    #[error("engine is shutting down")]
    ShuttingDown,
}
