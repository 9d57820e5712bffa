//! Synchronization engine
//!
//! Reconciles the local store with the server when connectivity allows.
//!
//! ## Architecture
//!
//! - `SyncManager` owns the status flag and runs push-then-pull cycles
//! - `SyncHandle` controls the background task started by
//!   [`SyncManager::start`] (timer and connectivity-regain triggers)
//! - Status lives in a `watch` channel; transitions and cycle reports are
//!   broadcast as [`SyncEvent`]s
//!
//! ## Cycle
//!
//! 1. Push every pending queue entry in sequence order
//! 2. Pull a snapshot of every collection and reconcile it with the cache
//!
//! Request failures are per item: logged, recorded on the queue entry and
//! skipped. Only failures that make the cycle itself unsafe move the status
//! to `Error`.

mod manager;
mod status;

pub use crate::storage::PullPolicy;
pub use manager::{SyncCommand, SyncHandle, SyncManager, SyncOptions};
pub use status::{CycleReport, SkipReason, SyncError, SyncEvent, SyncStatus, TriggerOutcome};
