//! Reachability probe
//!
//! A headless host gets no OS network-change signals, so the CLI decides
//! online/offline by opening a TCP connection to the API host. The result is
//! fed into the connectivity monitor as a transition signal.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::net::TcpStream;
use tracing::debug;

use fieldsync_core::ConnectivityMonitor;

/// Time between probes while the daemon runs
pub const PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Upper bound for a single connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Whether the host of `url` accepts TCP connections
pub async fn is_reachable(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let Some(port) = url.port_or_known_default() else {
        return false;
    };

    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(host, port, error = %e, "API host unreachable");
            false
        }
        Err(_) => {
            debug!(host, port, "API host probe timed out");
            false
        }
    }
}

/// Probe `url` forever, reporting transitions to `monitor`
pub async fn watch(url: Url, monitor: Arc<ConnectivityMonitor>) {
    let mut ticker = tokio::time::interval(PROBE_INTERVAL);
    loop {
        ticker.tick().await;
        monitor.set_online(is_reachable(&url).await);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::ConnectivityProvider;

    #[tokio::test]
    async fn test_reachable_when_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("http://{}", addr)).unwrap();

        assert!(is_reachable(&url).await);
    }

    #[tokio::test]
    async fn test_unreachable_after_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("http://{}", addr)).unwrap();

        assert!(!is_reachable(&url).await);
    }

    #[tokio::test]
    async fn test_url_without_host() {
        let url = Url::parse("file:///tmp/api").unwrap();
        assert!(!is_reachable(&url).await);
    }

    #[tokio::test]
    async fn test_watch_reports_to_monitor() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("http://{}", addr)).unwrap();

        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let mut rx = monitor.subscribe();
        let task = tokio::spawn(watch(url, monitor.clone()));

        // First tick fires immediately
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(monitor.current());
        task.abort();
    }
}
