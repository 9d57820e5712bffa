//! fieldsync core library
//!
//! Offline-first synchronization engine for farm-management records
//! (fields, operations, observations, personnel, machinery, warehouse items).
//!
//! # Architecture
//!
//! - **Local store**: schema-versioned SQLite cache of every collection plus
//!   a durable mutation queue
//! - **Mutation queue**: ordered log of local edits the server has not seen
//! - **Sync manager**: single-flight push-then-pull cycles, triggered by a
//!   timer, by local writes and by connectivity regain
//!
//! The server is authoritative. Reads are always served from the local store.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = open_local_store(&config);
//! let remote = Arc::new(HttpRemote::from_config(&config)?);
//! let monitor = Arc::new(ConnectivityMonitor::new(true));
//! let sync = SyncManager::new(store, remote, monitor, SyncOptions::from_config(&config));
//!
//! let fields = Repository::new(Collection::Fields, sync.clone());
//! fields.create(Record::new().with("name", "North Plot")).await?;
//! let handle = sync.start();
//! ```
//!
//! # Modules
//!
//! - `storage`: local store trait and its SQLite, memory and degraded forms
//! - `queue`: mutation queue over the store
//! - `connectivity`: online/offline state
//! - `remote`: REST client for the server collections
//! - `sync`: sync manager, status and events
//! - `repository`: per-collection data access facade
//! - `config`: application configuration

pub mod config;
pub mod connectivity;
pub mod models;
pub mod queue;
pub mod remote;
pub mod repository;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use connectivity::{ConnectivityMonitor, ConnectivityProvider};
pub use models::{Collection, MutationAction, QueueEntry, Record};
pub use queue::MutationQueue;
pub use remote::{HttpRemote, RemoteApi, RemoteError, UnconfiguredRemote};
pub use repository::{ReadFilter, Repository, RepositoryError};
pub use storage::{open_local_store, LocalStore, StorageError, StoreStats};
pub use sync::{SyncEvent, SyncHandle, SyncManager, SyncOptions, SyncStatus};
