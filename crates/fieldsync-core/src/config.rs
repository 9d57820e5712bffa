//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/fieldsync/config.toml)
//! 3. Environment variables (FIELDSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::PullPolicy;

/// Environment variable prefix
const ENV_PREFIX: &str = "FIELDSYNC";

/// Default interval between timer-driven sync cycles (five minutes)
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Default time the `Error` status is held before reverting to `Idle`
pub const DEFAULT_ERROR_COOLDOWN_SECS: u64 = 5;

/// Default per-request network timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (SQLite database, logs)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the REST API, e.g. `https://farm.example.com`
    #[serde(default)]
    pub api_url: Option<String>,

    /// Seconds between timer-driven sync cycles
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Seconds the `Error` status is shown before reverting to `Idle`
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,

    /// Timeout applied to every individual network call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How a pulled snapshot is reconciled with the local cache
    #[serde(default)]
    pub pull_policy: PullPolicy,

    /// Log file path (defaults to {data_dir}/fieldsync.log)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_url: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            error_cooldown_secs: DEFAULT_ERROR_COOLDOWN_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            pull_policy: PullPolicy::default(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Empty string clears the URL
        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            self.api_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Some(secs) = env_secs("SYNC_INTERVAL_SECS")? {
            self.sync_interval_secs = secs;
        }
        if let Some(secs) = env_secs("ERROR_COOLDOWN_SECS")? {
            self.error_cooldown_secs = secs;
        }
        if let Some(secs) = env_secs("REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = secs;
        }

        if let Ok(val) = std::env::var(format!("{}_PULL_POLICY", ENV_PREFIX)) {
            self.pull_policy = val
                .parse::<PullPolicy>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid {}_PULL_POLICY", ENV_PREFIX))?;
        }

        Ok(())
    }

    /// Every timing must be at least one second
    fn validate(&self) -> Result<()> {
        for (key, secs) in [
            ("sync_interval_secs", self.sync_interval_secs),
            ("error_cooldown_secs", self.error_cooldown_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if secs == 0 {
                bail!("{} must be at least 1", key);
            }
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with FIELDSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fieldsync")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("fieldsync.db")
    }

    /// Get the path to the log file
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("fieldsync.log"))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_secs(name: &str) -> Result<Option<u64>> {
    let key = format!("{}_{}", ENV_PREFIX, name);
    match std::env::var(&key) {
        Ok(val) => val
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", key, val)),
        Err(_) => Ok(None),
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
}

fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn default_error_cooldown_secs() -> u64 {
    DEFAULT_ERROR_COOLDOWN_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "FIELDSYNC_DATA_DIR",
        "FIELDSYNC_API_URL",
        "FIELDSYNC_SYNC_INTERVAL_SECS",
        "FIELDSYNC_ERROR_COOLDOWN_SECS",
        "FIELDSYNC_REQUEST_TIMEOUT_SECS",
        "FIELDSYNC_PULL_POLICY",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.api_url.is_none());
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
        assert_eq!(config.pull_policy, PullPolicy::Mirror);
        assert!(config.data_dir.ends_with("fieldsync"));
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.sqlite_path().ends_with("fieldsync.db"));
        assert!(config.log_path().ends_with("fieldsync.log"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FIELDSYNC_DATA_DIR", "/tmp/fieldsync-test");
        config.apply_env_overrides().unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/fieldsync-test"));
    }

    #[test]
    fn test_env_override_api_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FIELDSYNC_API_URL", "http://localhost:8080");
        config.apply_env_overrides().unwrap();
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:8080"));

        // Empty string clears it
        env::set_var("FIELDSYNC_API_URL", "");
        config.apply_env_overrides().unwrap();
        assert!(config.api_url.is_none());
    }

    #[test]
    fn test_env_override_timings() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FIELDSYNC_SYNC_INTERVAL_SECS", "60");
        env::set_var("FIELDSYNC_REQUEST_TIMEOUT_SECS", "5");
        config.apply_env_overrides().unwrap();

        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.error_cooldown_secs, DEFAULT_ERROR_COOLDOWN_SECS);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FIELDSYNC_SYNC_INTERVAL_SECS", "soon");
        assert!(config.apply_env_overrides().is_err());
    }

    #[test]
    fn test_env_override_pull_policy() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FIELDSYNC_PULL_POLICY", "upsert-only");
        config.apply_env_overrides().unwrap();
        assert_eq!(config.pull_policy, PullPolicy::UpsertOnly);
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            data_dir: PathBuf::from("/data/fieldsync"),
            api_url: Some("https://farm.example.com".to_string()),
            sync_interval_secs: 120,
            pull_policy: PullPolicy::UpsertOnly,
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("api_url"));
        assert!(toml_str.contains("pull_policy = \"upsert-only\""));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.api_url, config.api_url);
        assert_eq!(parsed.sync_interval_secs, 120);
        assert_eq!(parsed.pull_policy, PullPolicy::UpsertOnly);
    }

    #[test]
    fn test_load_from_str_fills_defaults() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            api_url = "http://example.com"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.api_url.as_deref(), Some("http://example.com"));
        assert_eq!(config.sync_interval_secs, DEFAULT_SYNC_INTERVAL_SECS);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = Config {
            data_dir: temp_dir.path().join("data"),
            api_url: Some("http://localhost:9000".to_string()),
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.api_url, config.api_url);
        assert_eq!(loaded.data_dir, config.data_dir);
    }

    #[test]
    fn test_load_does_not_require_a_usable_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = Config {
            data_dir: blocker.join("data"),
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.data_dir, blocker.join("data"));
        assert!(!loaded.data_dir.exists());
    }

    #[test]
    fn test_zero_timings_are_rejected() {
        let _guard = EnvGuard::new(ENV_VARS);

        let err = Config::load_from_str("request_timeout_secs = 0").unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));

        env::set_var("FIELDSYNC_ERROR_COOLDOWN_SECS", "0");
        let err = Config::load_from_str("").unwrap_err();
        assert!(err.to_string().contains("error_cooldown_secs"));
    }

    #[test]
    fn test_env_override_rejects_unknown_pull_policy() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FIELDSYNC_PULL_POLICY", "merge");
        let err = config.apply_env_overrides().unwrap_err();
        assert!(err.to_string().contains("FIELDSYNC_PULL_POLICY"));
        assert_eq!(config.pull_policy, PullPolicy::Mirror);
    }
}
