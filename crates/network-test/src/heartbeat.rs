//! Heartbeat publisher.
//!
//! Keeps `liveness:<node>` fresh and this node's id in the `dynos`
//! membership set.
//!
//! ```text
//!   timer task ──tick──► [ 1 slot ] ──tick──► worker task ──► registry
//!      sleep(interval)                     set liveness (TTL)
//!                                          sadd dynos
//! ```
//!
//! The timer blocks on the single-slot channel while the worker is busy, so
//! a slow registry stretches the heartbeat interval instead of queueing
//! beats. At most one tick is ever waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::keys;
use crate::registry::Registry;
use crate::schedule::{TaskHandle, stopped};

/// Counters exposed for observing the publisher.
#[derive(Debug, Default)]
pub struct HeartbeatStats {
    ticks: AtomicU64,
    beats: AtomicU64,
    liveness_failures: AtomicU64,
    membership_failures: AtomicU64,
}

impl HeartbeatStats {
    /// Ticks handed from the timer to the worker.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Heartbeat cycles the worker has completed.
    #[must_use]
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn liveness_failures(&self) -> u64 {
        self.liveness_failures.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn membership_failures(&self) -> u64 {
        self.membership_failures.load(Ordering::SeqCst)
    }
}

/// Publishes this node's liveness on a fixed interval.
#[derive(Clone)]
pub struct HeartbeatPublisher {
    node_id: String,
    registry: Arc<dyn Registry>,
    interval: Duration,
    ttl: Duration,
    stats: Arc<HeartbeatStats>,
}

impl HeartbeatPublisher {
    pub fn new(
        node_id: impl Into<String>,
        registry: Arc<dyn Registry>,
        interval: Duration,
        ttl: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            registry,
            interval,
            ttl,
            stats: Arc::new(HeartbeatStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<HeartbeatStats> {
        self.stats.clone()
    }

    /// Run one heartbeat cycle: refresh the liveness record, then register
    /// in the membership set. Each write fails independently and is logged.
    pub async fn beat(&self) {
        let key = keys::liveness_key(&self.node_id);
        let value = keys::healthy_value();

        debug!(node = %self.node_id, "Reporting liveness");
        if let Err(e) = self.registry.set(&key, &value, Some(self.ttl)).await {
            self.stats.liveness_failures.fetch_add(1, Ordering::SeqCst);
            error!(node = %self.node_id, error = %e, "Error reporting liveness");
        }

        if let Err(e) = self
            .registry
            .set_add(keys::MEMBERSHIP_SET, &self.node_id)
            .await
        {
            self.stats.membership_failures.fetch_add(1, Ordering::SeqCst);
            error!(node = %self.node_id, error = %e, "Error adding node to membership set");
        }

        self.stats.beats.fetch_add(1, Ordering::SeqCst);
    }

    /// Start the timer and worker tasks. Call once per process; every call
    /// starts an independent pair. Dropping the handle leaves them running.
    pub fn start(&self) -> TaskHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tick_tx, tick_rx) = mpsc::channel::<()>(1);

        info!(
            node = %self.node_id,
            interval_ms = self.interval.as_millis() as u64,
            ttl_ms = self.ttl.as_millis() as u64,
            "Starting heartbeat"
        );

        let worker = tokio::spawn(self.clone().worker(tick_rx, shutdown_rx.clone()));
        let timer = tokio::spawn(timer(
            self.interval,
            tick_tx,
            self.stats.clone(),
            shutdown_rx,
        ));

        TaskHandle::new("heartbeat", shutdown_tx, vec![timer, worker])
    }

    async fn worker(self, mut ticks: mpsc::Receiver<()>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                tick = ticks.recv() => match tick {
                    Some(()) => self.beat().await,
                    None => break,
                },
                _ = stopped(&mut shutdown) => break,
            }
        }
        debug!(node = %self.node_id, "heartbeat worker stopped");
    }
}

async fn timer(
    interval: Duration,
    ticks: mpsc::Sender<()>,
    stats: Arc<HeartbeatStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stopped(&mut shutdown) => break,
        }

        // Blocks while the slot is full, which is the backpressure.
        tokio::select! {
            sent = ticks.send(()) => {
                if sent.is_err() {
                    break;
                }
                stats.ticks.fetch_add(1, Ordering::SeqCst);
            }
            _ = stopped(&mut shutdown) => break,
        }
    }
    debug!("heartbeat timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistry, RegistryError, RegistryResult, ScanPage};
    use async_trait::async_trait;

    /// Registry whose writes can be made to fail.
    struct FailingRegistry {
        inner: MemoryRegistry,
        fail_set: bool,
        fail_set_add: bool,
    }

    fn refused(command: &'static str) -> RegistryError {
        RegistryError::Command {
            command,
            message: "connection refused".to_string(),
        }
    }

    #[async_trait]
    impl Registry for FailingRegistry {
        async fn get(&self, key: &str) -> RegistryResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RegistryResult<()> {
            if self.fail_set {
                return Err(refused("SET"));
            }
            self.inner.set(key, value, ttl).await
        }
        async fn set_add(&self, set_key: &str, member: &str) -> RegistryResult<()> {
            if self.fail_set_add {
                return Err(refused("SADD"));
            }
            self.inner.set_add(set_key, member).await
        }
        async fn set_members(&self, set_key: &str) -> RegistryResult<Vec<String>> {
            self.inner.set_members(set_key).await
        }
        async fn scan(&self, cursor: u64, pattern: &str, page_size: usize) -> RegistryResult<ScanPage> {
            self.inner.scan(cursor, pattern, page_size).await
        }
        async fn multi_get(&self, keys: &[String]) -> RegistryResult<Vec<Option<String>>> {
            self.inner.multi_get(keys).await
        }
    }

    fn failing(fail_set: bool, fail_set_add: bool) -> Arc<FailingRegistry> {
        Arc::new(FailingRegistry {
            inner: MemoryRegistry::new(),
            fail_set,
            fail_set_add,
        })
    }

    /// Registry whose writes take a fixed amount of (tokio) time.
    struct SlowRegistry {
        inner: MemoryRegistry,
        delay: Duration,
    }

    #[async_trait]
    impl Registry for SlowRegistry {
        async fn get(&self, key: &str) -> RegistryResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RegistryResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, value, ttl).await
        }
        async fn set_add(&self, set_key: &str, member: &str) -> RegistryResult<()> {
            self.inner.set_add(set_key, member).await
        }
        async fn set_members(&self, set_key: &str) -> RegistryResult<Vec<String>> {
            self.inner.set_members(set_key).await
        }
        async fn scan(&self, cursor: u64, pattern: &str, page_size: usize) -> RegistryResult<ScanPage> {
            self.inner.scan(cursor, pattern, page_size).await
        }
        async fn multi_get(&self, keys: &[String]) -> RegistryResult<Vec<Option<String>>> {
            self.inner.multi_get(keys).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_on_interval() {
        let registry = Arc::new(MemoryRegistry::new());
        let publisher = HeartbeatPublisher::new(
            "web.1",
            registry.clone(),
            Duration::from_millis(10_000),
            Duration::from_secs(60),
        );
        let stats = publisher.stats();
        let handle = publisher.start();

        tokio::time::sleep(Duration::from_millis(35_000)).await;
        assert_eq!(stats.beats(), 3);
        assert!(registry.get("liveness:web.1").await.expect("get").is_some());
        assert_eq!(
            registry.set_members("dynos").await.expect("smembers"),
            vec!["web.1".to_string()]
        );

        handle.stop().await;
        tokio::time::sleep(Duration::from_millis(30_000)).await;
        assert_eq!(stats.beats(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_keeps_beating() {
        let registry = Arc::new(MemoryRegistry::new());
        let publisher = HeartbeatPublisher::new(
            "web.1",
            registry.clone(),
            Duration::from_millis(10_000),
            Duration::from_secs(60),
        );
        let stats = publisher.stats();
        drop(publisher.start());

        tokio::time::sleep(Duration::from_millis(35_000)).await;
        assert_eq!(stats.beats(), 3);
        assert_eq!(
            registry.set_members("dynos").await.expect("smembers"),
            vec!["web.1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_liveness_write_still_registers_membership() {
        let registry = failing(true, false);
        let publisher = HeartbeatPublisher::new(
            "web.1",
            registry.clone(),
            Duration::from_secs(10),
            Duration::from_secs(60),
        );

        publisher.beat().await;

        let stats = publisher.stats();
        assert_eq!(stats.liveness_failures(), 1);
        assert_eq!(stats.membership_failures(), 0);
        assert_eq!(stats.beats(), 1);
        assert!(registry.inner.get("liveness:web.1").await.expect("get").is_none());
        assert_eq!(
            registry.inner.set_members("dynos").await.expect("smembers"),
            vec!["web.1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_membership_write_keeps_liveness() {
        let registry = failing(false, true);
        let publisher = HeartbeatPublisher::new(
            "web.1",
            registry.clone(),
            Duration::from_secs(10),
            Duration::from_secs(60),
        );

        publisher.beat().await;
        publisher.beat().await;

        let stats = publisher.stats();
        assert_eq!(stats.liveness_failures(), 0);
        assert_eq!(stats.membership_failures(), 2);
        assert_eq!(stats.beats(), 2);
        let value = registry
            .inner
            .get("liveness:web.1")
            .await
            .expect("get")
            .expect("liveness written");
        assert!(value.starts_with("healthy:"));
        assert!(registry.inner.set_members("dynos").await.expect("smembers").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_registry_delays_rather_than_queues() {
        let registry = Arc::new(SlowRegistry {
            inner: MemoryRegistry::new(),
            delay: Duration::from_secs(35),
        });
        let publisher = HeartbeatPublisher::new(
            "web.1",
            registry,
            Duration::from_secs(10),
            Duration::from_secs(60),
        );
        let stats = publisher.stats();
        let handle = publisher.start();

        tokio::time::sleep(Duration::from_secs(300)).await;

        // An unbounded queue would have accepted ~30 ticks by now.
        let (ticks, beats) = (stats.ticks(), stats.beats());
        assert!(ticks <= beats + 2, "ticks {ticks} outran beats {beats}");
        assert!(ticks < 15, "ticks {ticks} were not held back");
        assert!(beats >= 5);

        handle.stop().await;
    }
}
