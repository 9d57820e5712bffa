//! Sync manager
//!
//! Single-flight push-then-pull cycles over an injected store, remote and
//! connectivity source.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::status::{CycleReport, SkipReason, SyncError, SyncEvent, SyncStatus, TriggerOutcome};
use crate::config::{
    Config, DEFAULT_ERROR_COOLDOWN_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SYNC_INTERVAL_SECS,
};
use crate::connectivity::ConnectivityProvider;
use crate::models::{Collection, MutationAction, QueueEntry};
use crate::queue::MutationQueue;
use crate::remote::{with_timeout, RemoteApi, RemoteResult};
use crate::storage::{LocalStore, PullPolicy};

/// Buffered events per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 64;

/// Shortest timer period accepted by the background task
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for the sync manager
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Period of timer-driven cycles
    pub interval: Duration,
    /// How long `Error` is held before reverting to `Idle`
    pub error_cooldown: Duration,
    /// Deadline for each individual network call
    pub request_timeout: Duration,
    pub pull_policy: PullPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            error_cooldown: Duration::from_secs(DEFAULT_ERROR_COOLDOWN_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            pull_policy: PullPolicy::default(),
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.sync_interval(),
            error_cooldown: config.error_cooldown(),
            request_timeout: config.request_timeout(),
            pull_policy: config.pull_policy,
        }
    }
}

/// Commands sent to the background task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Run a cycle now
    SyncNow,
    /// Stop the background task
    Shutdown,
}

/// Handle to the background task started by [`SyncManager::start`]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Ask the background task to run a cycle; false once it has stopped
    pub async fn sync_now(&self) -> bool {
        self.command_tx.send(SyncCommand::SyncNow).await.is_ok()
    }

    /// Stop the background task, waiting for an in-flight cycle to finish
    pub async fn stop(self) {
        let _ = self.command_tx.send(SyncCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Background sync task ended abnormally");
        }
    }
}

struct Shared {
    store: Arc<dyn LocalStore>,
    queue: MutationQueue,
    remote: Arc<dyn RemoteApi>,
    connectivity: Arc<dyn ConnectivityProvider>,
    options: SyncOptions,
    status: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
}

impl Shared {
    fn publish(&self, status: SyncStatus) {
        self.status.send_replace(status);
        // No subscribers is fine
        let _ = self.events.send(SyncEvent::StatusChanged(status));
    }
}

/// Reconciles the local store with the server
///
/// Cloning is cheap; clones share status, subscribers and dependencies.
#[derive(Clone)]
pub struct SyncManager {
    shared: Arc<Shared>,
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<dyn ConnectivityProvider>,
        options: SyncOptions,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                queue: MutationQueue::new(Arc::clone(&store)),
                store,
                remote,
                connectivity,
                options,
                status,
                events,
            }),
        }
    }

    pub fn status(&self) -> SyncStatus {
        *self.shared.status.borrow()
    }

    /// Receiver that always holds the current status
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    /// Subscribe to status transitions and cycle reports
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    pub fn options(&self) -> &SyncOptions {
        &self.shared.options
    }

    pub fn is_online(&self) -> bool {
        self.shared.connectivity.current()
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.shared.queue
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.shared.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteApi> {
        &self.shared.remote
    }

    /// Run one cycle if the engine is idle, online and has a store
    ///
    /// Returns `Skipped` without side effects otherwise. A cycle-level
    /// failure moves the status to `Error` and is returned.
    pub async fn trigger_sync(&self) -> Result<TriggerOutcome, SyncError> {
        if !self.shared.store.is_available() {
            return Ok(TriggerOutcome::Skipped(SkipReason::StoreUnavailable));
        }
        if !self.is_online() {
            return Ok(TriggerOutcome::Skipped(SkipReason::Offline));
        }
        if let Err(current) = self.try_begin() {
            let reason = match current {
                SyncStatus::Error => SkipReason::CoolingDown,
                _ => SkipReason::AlreadySyncing,
            };
            return Ok(TriggerOutcome::Skipped(reason));
        }

        info!("Sync started");
        match self.run_cycle().await {
            Ok(report) => {
                info!(
                    pushed = report.pushed,
                    push_failures = report.push_failures,
                    pulled = report.pulled_collections,
                    pull_failures = report.pull_failures,
                    "Sync finished"
                );
                let _ = self
                    .shared
                    .events
                    .send(SyncEvent::CycleCompleted(report.clone()));
                self.shared.publish(SyncStatus::Idle);
                Ok(TriggerOutcome::Completed(report))
            }
            Err(e) => {
                error!(error = %e, "Sync failed");
                self.enter_error();
                Err(e)
            }
        }
    }

    /// Trigger a sync in the background without waiting for it
    ///
    /// Returns `None` when offline, without a store, or outside a runtime.
    pub fn request_sync(&self) -> Option<JoinHandle<()>> {
        if !self.is_online() || !self.shared.store.is_available() {
            return None;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, sync request dropped");
            return None;
        };

        let manager = self.clone();
        Some(runtime.spawn(async move { manager.run_trigger("request").await }))
    }

    /// Spawn the timer and connectivity-regain loop
    pub fn start(&self) -> SyncHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        // Baseline is taken here so a transition before the task runs is seen
        let mut online_rx = self.shared.connectivity.subscribe();
        let was_online = *online_rx.borrow_and_update();
        let task = tokio::spawn(sync_loop(self.clone(), command_rx, online_rx, was_online));

        info!(
            interval_secs = self.shared.options.interval.as_secs(),
            "Background sync started"
        );
        SyncHandle { command_tx, task }
    }

    // ==================== Cycle ====================

    /// Idle -> Syncing, or the status that prevented it
    fn try_begin(&self) -> Result<(), SyncStatus> {
        let mut observed = SyncStatus::Idle;
        let acquired = self.shared.status.send_if_modified(|status| {
            observed = *status;
            if *status == SyncStatus::Idle {
                *status = SyncStatus::Syncing;
                true
            } else {
                false
            }
        });

        if acquired {
            let _ = self
                .shared
                .events
                .send(SyncEvent::StatusChanged(SyncStatus::Syncing));
            Ok(())
        } else {
            Err(observed)
        }
    }

    fn enter_error(&self) {
        self.shared.publish(SyncStatus::Error);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(shared.options.error_cooldown).await;
            let reverted = shared.status.send_if_modified(|status| {
                if *status == SyncStatus::Error {
                    *status = SyncStatus::Idle;
                    true
                } else {
                    false
                }
            });
            if reverted {
                info!("Sync error cleared");
                let _ = shared
                    .events
                    .send(SyncEvent::StatusChanged(SyncStatus::Idle));
            }
        });
    }

    async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let mut report = CycleReport::default();
        self.push_pending(&mut report).await?;
        self.pull_all(&mut report).await;
        Ok(report)
    }

    async fn push_pending(&self, report: &mut CycleReport) -> Result<(), SyncError> {
        let queue = &self.shared.queue;
        let pending = queue.pending().map_err(SyncError::QueueUnreadable)?;
        if !pending.is_empty() {
            debug!(count = pending.len(), "Pushing queued mutations");
        }

        for entry in pending {
            let result = with_timeout(self.shared.options.request_timeout, self.push(&entry)).await;
            match result {
                Ok(()) => {
                    queue
                        .mark_synced(entry.sequence_id)
                        .map_err(|source| SyncError::QueueWrite {
                            sequence_id: entry.sequence_id,
                            source,
                        })?;
                    report.pushed += 1;
                }
                Err(e) => {
                    warn!(
                        sequence_id = entry.sequence_id,
                        action = %entry.action,
                        collection = %entry.collection,
                        record_id = %entry.record_id,
                        error = %e,
                        "Push failed, will retry next cycle"
                    );
                    report.push_failures += 1;
                    if let Err(e) = queue.record_failure(entry.sequence_id, &e.to_string()) {
                        warn!(sequence_id = entry.sequence_id, error = %e, "Could not record push failure");
                    }
                }
            }
        }
        Ok(())
    }

    async fn push(&self, entry: &QueueEntry) -> RemoteResult<()> {
        let remote = &self.shared.remote;
        match entry.action {
            MutationAction::Create => remote.create(entry.collection, &entry.payload).await,
            MutationAction::Update => {
                remote
                    .update(entry.collection, &entry.record_id, &entry.payload)
                    .await
            }
            MutationAction::Delete => remote.delete(entry.collection, &entry.record_id).await,
        }
    }

    async fn pull_all(&self, report: &mut CycleReport) {
        let options = &self.shared.options;

        for collection in Collection::ALL {
            let snapshot =
                with_timeout(options.request_timeout, self.shared.remote.fetch_all(collection))
                    .await;
            let records = match snapshot {
                Ok(records) => records,
                Err(e) => {
                    warn!(%collection, error = %e, "Pull failed, keeping cached data");
                    report.pull_failures += 1;
                    continue;
                }
            };

            match self
                .shared
                .store
                .apply_snapshot(collection, &records, options.pull_policy)
            {
                Ok(applied) => {
                    for failure in &applied.failures {
                        warn!(
                            %collection,
                            index = failure.index,
                            id = ?failure.id,
                            error = %failure.error,
                            "Skipped server record"
                        );
                    }
                    report.pulled_collections += 1;
                    report.records_written += applied.written;
                    report.records_pruned += applied.pruned;
                    report.records_skipped += applied.skipped_pending;
                    report.record_failures += applied.failures.len();
                }
                Err(e) => {
                    warn!(%collection, error = %e, "Could not store pulled snapshot");
                    report.pull_failures += 1;
                }
            }
        }
    }

    async fn run_trigger(&self, source: &'static str) {
        match self.trigger_sync().await {
            Ok(TriggerOutcome::Completed(_)) => {}
            Ok(TriggerOutcome::Skipped(reason)) => debug!(source, %reason, "Sync skipped"),
            // Already logged by trigger_sync
            Err(_) => {}
        }
    }
}

/// Background loop: timer ticks, connectivity regain and commands
async fn sync_loop(
    manager: SyncManager,
    mut commands: mpsc::Receiver<SyncCommand>,
    mut online_rx: watch::Receiver<bool>,
    mut was_online: bool,
) {
    let period = manager.options().interval.max(MIN_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut watching = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if manager.status() == SyncStatus::Idle && manager.is_online() {
                    manager.run_trigger("timer").await;
                }
            }
            changed = online_rx.changed(), if watching => {
                if changed.is_err() {
                    warn!("Connectivity source closed, only timer syncs remain");
                    watching = false;
                    continue;
                }
                let online = *online_rx.borrow_and_update();
                if online && !was_online {
                    info!("Connectivity regained, syncing");
                    manager.run_trigger("connectivity").await;
                }
                was_online = online;
            }
            command = commands.recv() => {
                match command {
                    Some(SyncCommand::SyncNow) => manager.run_trigger("command").await,
                    Some(SyncCommand::Shutdown) | None => break,
                }
            }
        }
    }

    debug!("Background sync stopped");
}
