//! Periodic liveness pings for long-running connections.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use jcli_core::{BoxFuture, CliError, CliResult};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Something that can be pinged.
pub trait Pinger: Send + Sync + 'static {
    fn ping<'a>(&'a self) -> BoxFuture<'a, CliResult<()>>;

    /// Once true, the keepalive loop ends.
    fn is_closed(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub interval: Duration,
    /// How long one ping may take before the connection counts as dead.
    pub timeout: Duration,
}

impl KeepaliveConfig {
    /// Timeout is three quarters of `interval`.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            timeout: interval * 3 / 4,
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self::with_interval(DEFAULT_PING_INTERVAL)
    }
}

/// Ping every `config.interval` until the pinger closes. Failed or slow
/// pings are reported to `on_dead`; the loop keeps going.
pub fn spawn_keepalive<P, F>(pinger: P, config: KeepaliveConfig, on_dead: F) -> JoinHandle<()>
where
    P: Pinger,
    F: Fn(CliError) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(config.interval);
        ticker.tick().await; // first tick is immediate

        loop {
            ticker.tick().await;
            if pinger.is_closed() {
                break;
            }
            match time::timeout(config.timeout, pinger.ping()).await {
                Ok(Ok(())) => tracing::trace!("ping ok"),
                Ok(Err(e)) => on_dead(e),
                Err(_) => on_dead(CliError::Timeout),
            }
        }

        tracing::debug!("keepalive loop ended");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct Counter {
        pings: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
        hang: bool,
    }

    impl Pinger for Counter {
        fn ping<'a>(&'a self) -> BoxFuture<'a, CliResult<()>> {
            Box::pin(async move {
                let n = self.pings.fetch_add(1, Ordering::SeqCst) + 1;
                if self.hang {
                    std::future::pending::<()>().await;
                }
                if n >= 3 {
                    self.closed.store(true, Ordering::SeqCst);
                }
                Ok(())
            })
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn counter(hang: bool) -> Counter {
        Counter {
            pings: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            hang,
        }
    }

    #[test]
    fn timeout_is_three_quarters() {
        let config = KeepaliveConfig::default();
        assert_eq!(config.interval, Duration::from_secs(15));
        assert_eq!(config.timeout, Duration::from_millis(11_250));
    }

    #[tokio::test]
    async fn stops_once_closed() {
        let pinger = counter(false);
        let handle = spawn_keepalive(
            pinger.clone(),
            KeepaliveConfig::with_interval(Duration::from_millis(10)),
            |e| panic!("unexpected {e}"),
        );
        time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pinger.pings.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_ping_reports_dead() {
        let pinger = counter(true);
        let deaths = Arc::new(Mutex::new(Vec::new()));
        let sink = deaths.clone();
        let handle = spawn_keepalive(
            pinger.clone(),
            KeepaliveConfig::with_interval(Duration::from_millis(20)),
            move |e| sink.lock().unwrap().push(e.to_string()),
        );
        time::sleep(Duration::from_millis(150)).await;
        handle.abort();
        let deaths = deaths.lock().unwrap();
        assert!(!deaths.is_empty());
        assert!(deaths.iter().all(|d| d == "timeout"));
    }
}
