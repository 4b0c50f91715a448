//! Periodic eviction of dead registry entries.
//!
//! Sessions already evict on every close and on every listing request. The
//! sweeper covers the quiet case: a recipient whose forward failed while no
//! one else connects.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::registry::{Liveness, Registry};
use crate::signals::ShutdownHandle;

/// Background task running `clean_disconnects` on a fixed interval.
pub struct Sweeper<H> {
    registry: Arc<Registry<H>>,
    interval: Duration,
}

impl<H: Liveness + 'static> Sweeper<H> {
    /// Creates a sweeper over `registry`.
    pub fn new(registry: Arc<Registry<H>>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Runs one sweep, returning the number of evicted entries.
    pub async fn sweep(&self) -> usize {
        let evicted = self.registry.clean_disconnects().await;
        if evicted > 0 {
            info!(evicted, "Periodic sweep evicted dead connections");
        } else {
            debug!("Periodic sweep found nothing to evict");
        }
        evicted
    }

    /// Runs until shutdown is triggered.
    pub async fn run(self, shutdown: ShutdownHandle) {
        info!(interval_secs = self.interval.as_secs(), "Sweeper started");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let signal_wait = shutdown.signal().wait();
        tokio::pin!(signal_wait);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = &mut signal_wait => {
                    info!("Sweeper stopping");
                    break;
                }
            }
        }
    }

    /// Spawns [`Sweeper::run`] on the current runtime.
    pub fn spawn(self, shutdown: ShutdownHandle) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::UserRecord;
    use notirouter_protocol::Address;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestConn {
        alive: AtomicBool,
    }

    impl Liveness for TestConn {
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    fn conn(alive: bool) -> Arc<TestConn> {
        Arc::new(TestConn {
            alive: AtomicBool::new(alive),
        })
    }

    #[tokio::test]
    async fn sweep_evicts_dead_entries() {
        let registry = Arc::new(Registry::new("Server"));
        let live = conn(true);
        let dead = conn(false);
        registry.add(Address::new(1), UserRecord::client("live", &live)).await;
        registry.add(Address::new(2), UserRecord::client("dead", &dead)).await;

        let sweeper = Sweeper::new(registry.clone(), Duration::from_secs(60));
        assert_eq!(sweeper.sweep().await, 1);
        assert!(registry.get(Address::new(1)).await.is_some());
        assert!(registry.get(Address::new(2)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_on_interval_and_stops_on_shutdown() {
        let registry = Arc::new(Registry::new("Server"));
        let target = conn(true);
        registry.add(Address::new(3), UserRecord::client("target", &target)).await;

        let shutdown = ShutdownHandle::new();
        let task = Sweeper::new(registry.clone(), Duration::from_secs(10)).spawn(shutdown.clone());

        target.alive.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(registry.get(Address::new(3)).await.is_some(), "swept too early");

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(registry.get(Address::new(3)).await.is_none());

        shutdown.trigger();
        task.await.unwrap();
    }
}
