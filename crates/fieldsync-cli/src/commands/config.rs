//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use fieldsync_core::sync::PullPolicy;
use fieldsync_core::Config;

use crate::output::{Output, OutputFormat};

const KEYS: &str = "data_dir, api_url, sync_interval_secs, error_cooldown_secs, \
                    request_timeout_secs, pull_policy, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "api_url": config.api_url,
                    "sync_interval_secs": config.sync_interval_secs,
                    "error_cooldown_secs": config.error_cooldown_secs,
                    "request_timeout_secs": config.request_timeout_secs,
                    "pull_policy": config.pull_policy,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!(
                "  api_url:              {}",
                config.api_url.as_deref().unwrap_or("(not set)")
            );
            println!("  sync_interval_secs:   {}", config.sync_interval_secs);
            println!("  error_cooldown_secs:  {}", config.error_cooldown_secs);
            println!("  request_timeout_secs: {}", config.request_timeout_secs);
            println!("  pull_policy:          {}", config.pull_policy);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";

    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "api_url" => {
            config.api_url = if unset { None } else { Some(value.to_string()) };
        }
        "sync_interval_secs" => {
            config.sync_interval_secs = parse_secs(key, value)?;
        }
        "error_cooldown_secs" => {
            config.error_cooldown_secs = parse_secs(key, value)?;
        }
        "request_timeout_secs" => {
            config.request_timeout_secs = parse_secs(key, value)?;
        }
        "pull_policy" => {
            config.pull_policy = value.parse::<PullPolicy>().map_err(anyhow::Error::msg)?;
        }
        "log_file" => {
            config.log_file = if unset { None } else { Some(value.into()) };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS
            );
        }
    }
    Ok(())
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    let secs: u64 = value
        .parse()
        .with_context(|| format!("Invalid value for {}. Use a whole number of seconds.", key))?;
    if secs == 0 {
        bail!("{} must be at least 1", key);
    }
    Ok(secs)
}
