//! Offline-first synchronization engine for a document-management client.
//!
//! The engine sits between the application and an unreliable network:
//! reads are served through a per-route cache strategy layer, mutations
//! flow through a durable FIFO sync queue in [`docsync_store`], and a
//! background coordinator drains the queue whenever connectivity allows.
//!
//! ```no_run
//! use docsync_engine::{
//!     CacheFetcher, ConnectivitySignal, Engine, EngineConfig, RemoteError,
//! };
//! use docsync_store::LocalStore;
//! use std::sync::Arc;
//!
//! # struct HttpFetcher;
//! # impl CacheFetcher for HttpFetcher {
//! #     fn fetch(&self, _path: &str) -> impl std::future::Future<
//! #         Output = Result<bytes::Bytes, RemoteError>> + Send {
//! #         async { Ok(bytes::Bytes::new()) }
//! #     }
//! # }
//! # use docsync_engine::{RemoteClient, RemoteRequest, RemoteAck};
//! # struct HttpRemote;
//! # impl RemoteClient for HttpRemote {
//! #     fn send(&self, _request: RemoteRequest) -> impl std::future::Future<
//! #         Output = Result<RemoteAck, RemoteError>> + Send {
//! #         async { Ok(RemoteAck { server_id: None }) }
//! #     }
//! # }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(LocalStore::open("app-data/docsync.journal")?);
//! let connectivity = ConnectivitySignal::new(true);
//! let handle = Engine::start(
//!     EngineConfig::default(),
//!     store,
//!     Arc::new(HttpRemote),
//!     Arc::new(HttpFetcher),
//!     connectivity,
//! );
//!
//! let response = handle.read("/files/doc-1/content").await?;
//! println!("served from {:?}", response.source);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod connectivity;
mod coordinator;
mod drain;
mod error;
mod eviction;
mod remote;

pub use cache::{
    CacheEntry, CacheFetcher, CacheLayer, CachePolicy, CacheSource, CachedResponse, PolicyTable,
};
pub use config::EngineConfig;
pub use connectivity::ConnectivitySignal;
pub use coordinator::{Engine, EngineHandle, MutationOutcome, StorageUsage, SyncStatusSummary};
pub use drain::{drain_queue, DrainReport};
pub use error::{EngineError, EngineResult, RemoteError};
pub use eviction::EvictionPolicy;
pub use remote::{MockRemote, RemoteAck, RemoteClient, RemoteRequest};
