//! Command handlers

pub mod config;
pub mod queue;
pub mod record;
pub mod status;
pub mod sync;
