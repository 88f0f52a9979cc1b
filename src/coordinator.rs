//! Shared worker-loop helpers (§4.7): running-state registry, shutdown
//! signalling, and a shutdown-aware long sleep. Every periodic job in
//! `pipeline::` is driven through [`Coordinator::run`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, Instrument};

use crate::store::Store;

/// Shared handle passed to every job. Cheap to clone; wraps the `Arc<dyn
/// Store>` the teacher's "one context value constructed at startup" redesign
/// note calls for.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn Store>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Coordinator { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn set_running(&self, name: &str) {
        if let Err(err) = self.store.set_running(name).await {
            error!(job = name, %err, "failed to record running state");
        }
    }

    async fn unset_running(&self, name: &str) {
        if let Err(err) = self.store.unset_running(name).await {
            error!(job = name, %err, "failed to clear running state");
        }
    }

    /// True if a shutdown sentinel is set, or the coordinator store is
    /// unreachable (fail-safe: treat "I can't tell" as "stop").
    pub async fn shutdown_requested(&self) -> bool {
        self.store.shutdown_requested().await
    }

    /// Sleep for `total_secs`, in `tick_secs` increments, returning early
    /// (with `false`) if a shutdown is requested mid-sleep.
    pub async fn long_sleep(&self, total_secs: u64, tick_secs: u64) -> bool {
        let mut remaining = total_secs;
        while remaining > 0 {
            if self.shutdown_requested().await {
                return false;
            }
            let step = remaining.min(tick_secs.max(1));
            tokio::time::sleep(Duration::from_secs(step)).await;
            remaining -= step;
        }
        !self.shutdown_requested().await
    }

    /// Run `job` forever on a `sleep_in_sec` cadence until shutdown is
    /// requested. Any error from `job` is logged and the loop continues —
    /// per §7, only the coordinator store being permanently unreachable is
    /// fatal, and that is surfaced as `shutdown_requested` returning true,
    /// not as a propagated error.
    pub async fn run<F, Fut>(&self, name: &'static str, sleep_in_sec: u64, mut job: F)
    where
        F: FnMut(Coordinator) -> Fut,
        Fut: Future<Output = crate::error::Result<()>>,
    {
        info!(job = name, "starting job");
        self.set_running(name).await;

        while !self.shutdown_requested().await {
            let span = info_span!("tick", job = name);
            let outcome = job(self.clone()).instrument(span).await;
            if let Err(err) = outcome {
                error!(job = name, %err, "job tick failed, continuing");
            }

            if !self.long_sleep(sleep_in_sec, 10).await {
                break;
            }
        }

        self.unset_running(name).await;
        info!(job = name, "stopped job");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn long_sleep_stops_early_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::new(store.clone());
        store.request_shutdown().await;
        assert!(!coordinator.long_sleep(100, 10).await);
    }

    #[tokio::test]
    async fn run_invokes_job_at_least_once_then_stops() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        let store_for_job = store.clone();
        coordinator
            .run("test-job", 1, move |_| {
                let calls = calls_clone.clone();
                let store = store_for_job.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    store.request_shutdown().await;
                    Ok(())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.running_count("test-job").await, 0);
    }
}
