//! Read-side cache strategy layer.
//!
//! Writes go through the sync queue; idempotent reads come through here.
//! Each request class gets one of two freshness contracts, selected by
//! path prefix at startup:
//!
//! - **cache-first-refresh** — serve the cached snapshot immediately and
//!   silently re-fetch in the background (rarely changing content: file
//!   bytes, thumbnails)
//! - **network-first-fallback** — try the network, fall back to the last
//!   snapshot, and degrade to a structured offline result rather than an
//!   error (volatile content: listings, metadata)

use crate::connectivity::ConnectivitySignal;
use crate::error::{EngineError, EngineResult, RemoteError};
use bytes::Bytes;
use docsync_store::now_millis;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Freshness contract for a request class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Serve cached data immediately, refresh silently afterward.
    CacheFirstRefresh,
    /// Prefer the network, fall back to cached data.
    NetworkFirstFallback,
}

/// Maps request-path prefixes to policies. Fixed at startup; the longest
/// matching prefix wins, with a default for everything else.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    default: CachePolicy,
    routes: Vec<(String, CachePolicy)>,
}

impl PolicyTable {
    /// Creates a table with only a default policy.
    #[must_use]
    pub fn new(default: CachePolicy) -> Self {
        Self {
            default,
            routes: Vec::new(),
        }
    }

    /// Adds a prefix route.
    #[must_use]
    pub fn route(mut self, prefix: impl Into<String>, policy: CachePolicy) -> Self {
        self.routes.push((prefix.into(), policy));
        self
    }

    /// Selects the policy for a request path.
    #[must_use]
    pub fn policy_for(&self, path: &str) -> CachePolicy {
        self.routes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, policy)| *policy)
            .unwrap_or(self.default)
    }
}

/// A timestamped response snapshot for one request signature.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Response body.
    pub body: Bytes,
    /// When the snapshot was stored (unix millis).
    pub stored_at: u64,
}

/// Where a cached read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Answered from the local snapshot.
    Cache,
    /// Answered by the network.
    Network,
}

/// A successful read through the cache layer.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Response body.
    pub body: Bytes,
    /// Where the body came from.
    pub source: CacheSource,
}

/// Fetches one idempotent read from the remote service.
pub trait CacheFetcher: Send + Sync + 'static {
    /// Issues the request for `path`.
    fn fetch(&self, path: &str) -> impl Future<Output = Result<Bytes, RemoteError>> + Send;
}

/// The cache strategy layer.
///
/// Entries are kept in memory only: snapshots of idempotent reads are
/// reconstructible, unlike the store's durable families.
pub struct CacheLayer<F> {
    fetcher: Arc<F>,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    table: PolicyTable,
    connectivity: ConnectivitySignal,
    timeout: Duration,
}

impl<F: CacheFetcher> CacheLayer<F> {
    /// Creates the layer.
    pub fn new(
        fetcher: Arc<F>,
        table: PolicyTable,
        connectivity: ConnectivitySignal,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            entries: Arc::new(RwLock::new(HashMap::new())),
            table,
            connectivity,
            timeout,
        }
    }

    /// Reads `path` under its configured policy.
    ///
    /// Returns [`EngineError::Offline`] only when disconnected (or the
    /// network unavailable) with nothing cached, so callers can tell
    /// "offline, no data" apart from a not-found the server reported.
    pub async fn read(&self, path: &str) -> EngineResult<CachedResponse> {
        match self.table.policy_for(path) {
            CachePolicy::CacheFirstRefresh => self.read_cache_first(path).await,
            CachePolicy::NetworkFirstFallback => self.read_network_first(path).await,
        }
    }

    /// Stores a snapshot directly, bypassing any fetch.
    pub fn prime(&self, path: impl Into<String>, body: Bytes) {
        self.entries.write().insert(
            path.into(),
            CacheEntry {
                body,
                stored_at: now_millis(),
            },
        );
    }

    /// Drops one snapshot.
    pub fn invalidate(&self, path: &str) {
        self.entries.write().remove(path);
    }

    /// Drops all snapshots.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// The stored snapshot for `path`, if any.
    #[must_use]
    pub fn entry(&self, path: &str) -> Option<CacheEntry> {
        self.entries.read().get(path).cloned()
    }

    async fn read_cache_first(&self, path: &str) -> EngineResult<CachedResponse> {
        if let Some(entry) = self.entry(path) {
            self.spawn_refresh(path.to_string());
            return Ok(CachedResponse {
                body: entry.body,
                source: CacheSource::Cache,
            });
        }

        if !self.connectivity.is_online() {
            return Err(EngineError::Offline);
        }
        let body = self
            .fetch_with_timeout(path)
            .await
            .map_err(|e| match e {
                RemoteError::Transient(_) => EngineError::Offline,
                permanent => EngineError::Remote(permanent),
            })?;
        self.store(path, body.clone());
        Ok(CachedResponse {
            body,
            source: CacheSource::Network,
        })
    }

    async fn read_network_first(&self, path: &str) -> EngineResult<CachedResponse> {
        if !self.connectivity.is_online() {
            // No network contact at all while offline.
            return match self.entry(path) {
                Some(entry) => Ok(CachedResponse {
                    body: entry.body,
                    source: CacheSource::Cache,
                }),
                None => Err(EngineError::Offline),
            };
        }

        match self.fetch_with_timeout(path).await {
            Ok(body) => {
                self.store(path, body.clone());
                Ok(CachedResponse {
                    body,
                    source: CacheSource::Network,
                })
            }
            Err(error) => match self.entry(path) {
                Some(entry) => {
                    debug!(path, %error, "network-first read fell back to cache");
                    Ok(CachedResponse {
                        body: entry.body,
                        source: CacheSource::Cache,
                    })
                }
                None => match error {
                    RemoteError::Transient(_) => Err(EngineError::Offline),
                    permanent => Err(EngineError::Remote(permanent)),
                },
            },
        }
    }

    async fn fetch_with_timeout(&self, path: &str) -> Result<Bytes, RemoteError> {
        match tokio::time::timeout(self.timeout, self.fetcher.fetch(path)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient("request timed out".into())),
        }
    }

    fn store(&self, path: &str, body: Bytes) {
        self.entries.write().insert(
            path.to_string(),
            CacheEntry {
                body,
                stored_at: now_millis(),
            },
        );
    }

    /// Silent stale-while-revalidate refresh. Failures are logged and
    /// the stale entry stays in place.
    fn spawn_refresh(&self, path: String) {
        let fetcher = Arc::clone(&self.fetcher);
        let entries = Arc::clone(&self.entries);
        let timeout = self.timeout;
        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, fetcher.fetch(&path)).await;
            match result {
                Ok(Ok(body)) => {
                    entries.write().insert(
                        path,
                        CacheEntry {
                            body,
                            stored_at: now_millis(),
                        },
                    );
                }
                Ok(Err(error)) => debug!(path, %error, "background refresh failed"),
                Err(_) => debug!(path, "background refresh timed out"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MockFetcher {
        responses: Mutex<HashMap<String, Result<Bytes, RemoteError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        fn respond(&self, path: &str, body: &'static [u8]) {
            self.responses
                .lock()
                .insert(path.into(), Ok(Bytes::from_static(body)));
        }

        fn fail(&self, path: &str, error: RemoteError) {
            self.responses.lock().insert(path.into(), Err(error));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl CacheFetcher for MockFetcher {
        fn fetch(&self, path: &str) -> impl Future<Output = Result<Bytes, RemoteError>> + Send {
            let result = self
                .responses
                .lock()
                .get(path)
                .cloned()
                .unwrap_or(Err(RemoteError::Transient("no response scripted".into())));
            self.calls.lock().push(path.to_string());
            async move { result }
        }
    }

    fn layer(fetcher: Arc<MockFetcher>, online: bool) -> CacheLayer<MockFetcher> {
        let table = PolicyTable::new(CachePolicy::NetworkFirstFallback)
            .route("/files/", CachePolicy::CacheFirstRefresh);
        CacheLayer::new(
            fetcher,
            table,
            ConnectivitySignal::new(online),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn longest_prefix_wins() {
        let table = PolicyTable::new(CachePolicy::NetworkFirstFallback)
            .route("/files/", CachePolicy::CacheFirstRefresh)
            .route("/files/meta/", CachePolicy::NetworkFirstFallback);
        assert_eq!(
            table.policy_for("/files/doc-1"),
            CachePolicy::CacheFirstRefresh
        );
        assert_eq!(
            table.policy_for("/files/meta/doc-1"),
            CachePolicy::NetworkFirstFallback
        );
        assert_eq!(
            table.policy_for("/anything"),
            CachePolicy::NetworkFirstFallback
        );
    }

    #[tokio::test]
    async fn network_first_stores_and_returns() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.respond("/documents", b"fresh listing");
        let layer = layer(Arc::clone(&fetcher), true);

        let response = layer.read("/documents").await.unwrap();
        assert_eq!(response.source, CacheSource::Network);
        assert_eq!(response.body, &b"fresh listing"[..]);
        assert!(layer.entry("/documents").is_some());
    }

    #[tokio::test]
    async fn network_first_falls_back_on_failure() {
        let fetcher = Arc::new(MockFetcher::default());
        let layer = layer(Arc::clone(&fetcher), true);
        layer.prime("/documents", Bytes::from_static(b"stale listing"));
        fetcher.fail("/documents", RemoteError::Transient("503".into()));

        let response = layer.read("/documents").await.unwrap();
        assert_eq!(response.source, CacheSource::Cache);
        assert_eq!(response.body, &b"stale listing"[..]);
    }

    #[tokio::test]
    async fn offline_with_no_entry_is_structured_offline() {
        let fetcher = Arc::new(MockFetcher::default());
        let layer = layer(Arc::clone(&fetcher), false);

        let err = layer.read("/documents").await.unwrap_err();
        assert!(matches!(err, EngineError::Offline));
        // Never touched the network.
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn offline_with_entry_serves_cache_without_network_contact() {
        let fetcher = Arc::new(MockFetcher::default());
        let layer = layer(Arc::clone(&fetcher), false);
        layer.prime("/documents", Bytes::from_static(b"cached"));

        let response = layer.read("/documents").await.unwrap();
        assert_eq!(response.source, CacheSource::Cache);
        assert_eq!(response.body, &b"cached"[..]);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cache_first_serves_then_silently_refreshes() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.respond("/files/doc-1", b"v2 bytes");
        let layer = layer(Arc::clone(&fetcher), true);
        layer.prime("/files/doc-1", Bytes::from_static(b"v1 bytes"));

        let response = layer.read("/files/doc-1").await.unwrap();
        // Stale data served immediately.
        assert_eq!(response.source, CacheSource::Cache);
        assert_eq!(response.body, &b"v1 bytes"[..]);

        // The background refresh lands without another read.
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if layer.entry("/files/doc-1").unwrap().body == &b"v2 bytes"[..] {
                break;
            }
        }
        assert_eq!(layer.entry("/files/doc-1").unwrap().body, &b"v2 bytes"[..]);
        assert_eq!(fetcher.calls(), vec!["/files/doc-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_first_refresh_failure_keeps_stale_entry() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.fail("/files/doc-1", RemoteError::Transient("503".into()));
        let layer = layer(Arc::clone(&fetcher), true);
        layer.prime("/files/doc-1", Bytes::from_static(b"stale"));

        let response = layer.read("/files/doc-1").await.unwrap();
        assert_eq!(response.body, &b"stale"[..]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(layer.entry("/files/doc-1").unwrap().body, &b"stale"[..]);
    }

    #[tokio::test]
    async fn cache_first_miss_fetches() {
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.respond("/files/doc-1", b"first copy");
        let layer = layer(Arc::clone(&fetcher), true);

        let response = layer.read("/files/doc-1").await.unwrap();
        assert_eq!(response.source, CacheSource::Network);
        assert_eq!(response.body, &b"first copy"[..]);
    }

    #[tokio::test]
    async fn cache_first_miss_while_offline_is_offline() {
        let fetcher = Arc::new(MockFetcher::default());
        let layer = layer(Arc::clone(&fetcher), false);
        let err = layer.read("/files/doc-1").await.unwrap_err();
        assert!(matches!(err, EngineError::Offline));
    }
}
