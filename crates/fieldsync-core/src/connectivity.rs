//! Connectivity monitor
//!
//! Tracks the online/offline state reported by the platform. The engine never
//! polls: state changes only when a transition signal arrives through
//! [`ConnectivityMonitor::set_online`]. Consumers watch a typed channel
//! instead of registering callbacks.

use tokio::sync::watch;
use tracing::{info, warn};

/// Source of online/offline state for the sync manager
pub trait ConnectivityProvider: Send + Sync {
    /// Whether the device is online right now
    fn current(&self) -> bool;

    /// Receiver that observes every transition
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state fed by platform transition signals
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Start from the platform-reported state
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    /// Apply a "came online" / "went offline" signal
    ///
    /// Returns true when the state actually changed. Repeated signals for
    /// the current state are ignored so watchers see transitions only.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                info!("Network online");
            } else {
                warn!("Network offline");
            }
        }
        changed
    }
}

impl Default for ConnectivityMonitor {
    /// Assume online until told otherwise
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityProvider for ConnectivityMonitor {
    fn current(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert!(ConnectivityMonitor::new(true).current());
        assert!(!ConnectivityMonitor::new(false).current());
        assert!(ConnectivityMonitor::default().current());
    }

    #[test]
    fn test_set_online_reports_transitions_only() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.current());
    }

    #[tokio::test]
    async fn test_subscribers_observe_flapping() {
        let monitor = ConnectivityMonitor::new(true);
        let mut rx = monitor.subscribe();

        monitor.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        // No-op signal does not wake the watcher
        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
