//! Connectivity signal shared between the host and the coordinator.

use tokio::sync::watch;

/// A boolean online/offline signal.
///
/// The host feeds transitions in; the coordinator and cache layer observe
/// them. Duplicate or spurious transitions are absorbed here so a noisy
/// host signal cannot cause double-draining downstream.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tx: watch::Sender<bool>,
}

impl ConnectivitySignal {
    /// Creates a signal with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Reports a transition. Repeating the current state is a no-op and
    /// does not wake subscribers.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Current state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribes to transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}
