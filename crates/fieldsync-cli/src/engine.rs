//! Engine wiring for one CLI invocation
//!
//! One-shot commands keep the connectivity monitor offline while they run so
//! facade-requested background syncs never start; a cycle is run explicitly
//! (and awaited) at the points the command chooses. The daemon hands the
//! monitor to the reachability probe instead.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use reqwest::Url;

use fieldsync_core::sync::TriggerOutcome;
use fieldsync_core::{
    open_local_store, Collection, Config, ConnectivityMonitor, HttpRemote, RemoteApi, Repository,
    SyncManager, SyncOptions, UnconfiguredRemote,
};

use crate::output::Output;
use crate::probe;

pub struct Engine {
    pub config: Config,
    pub sync: SyncManager,
    pub monitor: Arc<ConnectivityMonitor>,
    /// Parsed API base URL, when configured
    pub api_url: Option<Url>,
}

impl Engine {
    pub fn open(config: Config) -> Result<Self> {
        let store = open_local_store(&config);

        let (remote, api_url): (Arc<dyn RemoteApi>, Option<Url>) = if config.api_url.is_some() {
            let http = HttpRemote::from_config(&config).context("Invalid API configuration")?;
            let url = http.base_url().clone();
            (Arc::new(http), Some(url))
        } else {
            (Arc::new(UnconfiguredRemote), None)
        };

        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let sync = SyncManager::new(
            store,
            remote,
            monitor.clone(),
            SyncOptions::from_config(&config),
        );

        Ok(Self {
            config,
            sync,
            monitor,
            api_url,
        })
    }

    pub fn repository(&self, collection: Collection) -> Repository {
        Repository::new(collection, self.sync.clone())
    }

    pub async fn is_reachable(&self) -> bool {
        match &self.api_url {
            Some(url) => probe::is_reachable(url).await,
            None => false,
        }
    }

    /// Run one sync cycle now and wait for it
    pub async fn sync_once(&self) -> Result<TriggerOutcome> {
        if self.api_url.is_none() {
            bail!(
                "API URL not configured. Set it with:\n  \
                 fieldsync config set api_url https://your-server"
            );
        }

        self.monitor.set_online(self.is_reachable().await);
        let outcome = self.sync.trigger_sync().await.context("Sync failed");
        self.monitor.set_online(false);
        outcome
    }

    /// Sync if configured and reachable; problems become warnings
    pub async fn auto_sync(&self, output: &Output) {
        if self.api_url.is_none() || !self.sync.store().is_available() {
            return;
        }

        match self.sync_once().await {
            Ok(TriggerOutcome::Completed(report)) if !report.is_clean() => {
                output.warn(&format!(
                    "Sync incomplete: {} push and {} pull failure(s). Changes stay queued.",
                    report.push_failures, report.pull_failures
                ));
            }
            Ok(_) => {}
            Err(e) => output.warn(&format!("Auto-sync failed: {:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::sync::SkipReason;
    use fieldsync_core::ConnectivityProvider;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_open_without_api_url() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(test_config(&temp_dir)).unwrap();

        assert!(engine.api_url.is_none());
        assert!(engine.sync.store().is_available());
        assert!(!engine.monitor.current());
        assert!(!engine.is_reachable().await);
        assert!(engine.sync_once().await.is_err());
    }

    #[test]
    fn test_open_rejects_invalid_url() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            api_url: Some("not a url".to_string()),
            ..test_config(&temp_dir)
        };
        assert!(Engine::open(config).is_err());
    }

    #[tokio::test]
    async fn test_sync_once_unreachable_is_skipped() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            api_url: Some(format!("http://{}", addr)),
            ..test_config(&temp_dir)
        };
        let engine = Engine::open(config).unwrap();

        let outcome = engine.sync_once().await.unwrap();
        assert_eq!(outcome, TriggerOutcome::Skipped(SkipReason::Offline));
        assert!(!engine.monitor.current());
    }

    #[tokio::test]
    async fn test_writes_stay_queued_without_server() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(test_config(&temp_dir)).unwrap();

        engine
            .repository(Collection::Fields)
            .create(fieldsync_core::Record::with_id("F1"))
            .await
            .unwrap();

        assert_eq!(engine.sync.queue().pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unusable_data_dir_opens_degraded() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let config_path = temp_dir.path().join("config.toml");
        Config {
            data_dir: blocker.join("data"),
            ..Config::default()
        }
        .save_to_path(&config_path)
        .unwrap();

        let config = Config::load_from_path(&config_path).unwrap();
        let engine = Engine::open(config).unwrap();

        assert!(!engine.sync.store().is_available());
        // Degraded reads go straight to the (unconfigured) server
        let err = engine
            .repository(Collection::Fields)
            .read(&fieldsync_core::ReadFilter::All)
            .await
            .unwrap_err();
        assert!(matches!(err, fieldsync_core::RepositoryError::Remote(_)));
    }
}
