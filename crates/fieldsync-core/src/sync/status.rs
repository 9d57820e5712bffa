//! Sync status, events and cycle outcomes

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::storage::StorageError;

/// Engine-wide sync status
///
/// `Idle -> Syncing` is the only way into a cycle. `Error` blocks new cycles
/// until the cool-down reverts it to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events broadcast by the sync manager
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Status transition
    StatusChanged(SyncStatus),
    /// A cycle ran to the end (item failures included)
    CycleCompleted(CycleReport),
}

/// Counters for one push-then-pull cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// Queue entries confirmed by the server and marked synced
    pub pushed: usize,
    /// Queue entries left pending after a failed or timed-out request
    pub push_failures: usize,
    /// Collections whose snapshot was fetched and applied
    pub pulled_collections: usize,
    /// Collections left stale
    pub pull_failures: usize,
    pub records_written: usize,
    pub records_pruned: usize,
    /// Snapshot records held back by a pending local edit
    pub records_skipped: usize,
    /// Snapshot records that could not be stored
    pub record_failures: usize,
}

impl CycleReport {
    /// True when every request of the cycle succeeded
    pub fn is_clean(&self) -> bool {
        self.push_failures == 0 && self.pull_failures == 0 && self.record_failures == 0
    }
}

/// Why a trigger did not start a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    StoreUnavailable,
    AlreadySyncing,
    /// In `Error`, waiting for the cool-down
    CoolingDown,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::Offline => "offline",
            SkipReason::StoreUnavailable => "offline store unavailable",
            SkipReason::AlreadySyncing => "a sync is already running",
            SkipReason::CoolingDown => "recovering from a failed sync",
        };
        f.write_str(text)
    }
}

/// Result of [`SyncManager::trigger_sync`](super::SyncManager::trigger_sync)
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Completed(CycleReport),
    Skipped(SkipReason),
}

/// Cycle-level failures; these move the status to `Error`
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Could not read the mutation queue: {0}")]
    QueueUnreadable(#[source] StorageError),

    /// A confirmed push could not be recorded; continuing would resend it
    #[error("Could not mark queue entry {sequence_id} as synced: {source}")]
    QueueWrite {
        sequence_id: i64,
        #[source]
        source: StorageError,
    },
}
