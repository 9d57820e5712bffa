//! Sync command handlers

use anyhow::{bail, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use fieldsync_core::sync::{SkipReason, TriggerOutcome};
use fieldsync_core::{SyncEvent, SyncStatus};

use crate::engine::Engine;
use crate::output::{Output, OutputFormat};
use crate::probe;

/// Run one sync cycle against the server
pub async fn sync(engine: &Engine, output: &Output) -> Result<()> {
    if !engine.sync.store().is_available() {
        bail!("Offline store unavailable; commands already talk to the server directly");
    }

    output.message("Syncing...");
    match engine.sync_once().await? {
        TriggerOutcome::Completed(report) => {
            if report.is_clean() {
                output.success("Sync complete");
            } else {
                output.warn("Sync finished with failures; unsent changes stay queued");
            }
            output.print_report(&report);
        }
        TriggerOutcome::Skipped(SkipReason::Offline) => {
            bail!(
                "Server unreachable at {}. Changes stay queued until it is back.",
                engine.config.api_url.as_deref().unwrap_or("(not set)")
            );
        }
        TriggerOutcome::Skipped(reason) => {
            output.message(&format!("Sync skipped: {}", reason));
        }
    }

    Ok(())
}

/// Keep syncing in the foreground until interrupted
///
/// Runs the timer and connectivity-regain triggers, with the reachability
/// probe standing in for platform network signals.
pub async fn daemon(engine: &Engine, output: &Output) -> Result<()> {
    let Some(url) = engine.api_url.clone() else {
        bail!(
            "API URL not configured. Set it with:\n  \
             fieldsync config set api_url https://your-server"
        );
    };

    engine.monitor.set_online(probe::is_reachable(&url).await);
    let mut events = engine.sync.subscribe();
    let handle = engine.sync.start();
    let probe_task = tokio::spawn(probe::watch(url.clone(), engine.monitor.clone()));

    info!(url = %url, "Daemon started");
    output.message(&format!(
        "Syncing with {} every {}s (Ctrl-C to stop)",
        url, engine.config.sync_interval_secs
    ));
    handle.sync_now().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SyncEvent::CycleCompleted(report)) => match output.format {
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::json!({"event": "cycle", "report": report})
                    ),
                    OutputFormat::Human => println!(
                        "[{}] pushed {} ({} failed), pulled {} ({} failed)",
                        chrono::Local::now().format("%H:%M:%S"),
                        report.pushed,
                        report.push_failures,
                        report.pulled_collections,
                        report.pull_failures
                    ),
                    OutputFormat::Quiet => {}
                },
                Ok(SyncEvent::StatusChanged(SyncStatus::Error)) => {
                    output.warn("Sync failed; retrying after cool-down (see log for details)");
                }
                Ok(SyncEvent::StatusChanged(_)) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event subscriber lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    probe_task.abort();
    handle.stop().await;
    output.success("Daemon stopped");
    Ok(())
}
