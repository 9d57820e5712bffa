//! Mutation queue command handlers

use anyhow::{Context, Result};

use crate::engine::Engine;
use crate::output::Output;

/// Show mutations waiting to be pushed
pub fn pending(engine: &Engine, output: &Output) -> Result<()> {
    let entries = engine
        .sync
        .queue()
        .pending()
        .context("Failed to read the mutation queue")?;
    output.print_queue(&entries);
    Ok(())
}

/// Remove entries the server has already acknowledged
pub fn purge(engine: &Engine, output: &Output) -> Result<()> {
    let removed = engine
        .sync
        .queue()
        .purge_synced()
        .context("Failed to purge the mutation queue")?;
    output.success(&format!("Removed {} synced queue entr{}", removed, if removed == 1 { "y" } else { "ies" }));
    Ok(())
}
