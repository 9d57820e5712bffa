//! Status command handler

use anyhow::{Context, Result};

use crate::engine::Engine;
use crate::output::{Output, OutputFormat};

/// Show store, queue and server status
pub async fn show(engine: &Engine, output: &Output) -> Result<()> {
    let stats = engine
        .sync
        .store()
        .stats()
        .context("Failed to read store statistics")?;
    let failing = engine
        .sync
        .queue()
        .pending()
        .context("Failed to read the mutation queue")?
        .iter()
        .filter(|entry| entry.attempts > 0)
        .count();
    let reachable = engine.is_reachable().await;
    let config = &engine.config;

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "api_url": config.api_url,
                "reachable": reachable,
                "sync_interval_secs": config.sync_interval_secs,
                "pull_policy": config.pull_policy,
                "store": {
                    "available": stats.available,
                    "path": config.sqlite_path(),
                    "schema_version": stats.schema_version,
                    "records": stats.records,
                },
                "queue": {
                    "pending": stats.pending_mutations,
                    "failing": failing,
                    "synced": stats.synced_mutations,
                }
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", stats.pending_mutations);
        }
        OutputFormat::Human => {
            println!("fieldsync Status");
            println!("================");
            println!();
            println!("Server:");
            println!(
                "  API URL:   {}",
                config.api_url.as_deref().unwrap_or("(not set)")
            );
            if config.api_url.is_some() {
                println!(
                    "  Reachable: {}",
                    if reachable { "yes" } else { "no" }
                );
            }
            println!("  Interval:  {}s", config.sync_interval_secs);
            println!("  Policy:    {}", config.pull_policy);
            println!();
            println!("Store:");
            if stats.available {
                println!("  Location:  {}", config.sqlite_path().display());
                println!("  Schema:    v{}", stats.schema_version);
            } else {
                println!("  Unavailable, reading and writing through the server");
            }
            println!();
            println!("Records:");
            for (collection, count) in &stats.records {
                println!("  {:<16} {}", collection.as_str(), count);
            }
            println!();
            println!("Queue:");
            println!("  Pending:   {}", stats.pending_mutations);
            if failing > 0 {
                println!("  Failing:   {} (see `fieldsync pending`)", failing);
            }
            println!("  Synced:    {}", stats.synced_mutations);
        }
    }

    Ok(())
}
