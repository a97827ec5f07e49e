use crate::{
    events::EventSink,
    metrics::{ControllerMetrics, SyncResult},
    queue::Queue,
    reconcile::{Reconciler, SyncError},
    store::Store,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::time;
use tracing::{info_span, Instrument};

/// The number of rate-limited retries a key gets before it is dropped.
pub const MAX_RETRIES: u32 = 15;

pub const DEFAULT_WORKERS: usize = 5;

/// Drains the queue with a pool of workers, syncing one key per worker at a
/// time.
pub struct Controller<S, E> {
    reconciler: Arc<Reconciler<S, E>>,
    queue: Queue<String>,
    metrics: ControllerMetrics,
}

// === impl Controller ===

impl<S, E> Clone for Controller<S, E> {
    fn clone(&self) -> Self {
        Self {
            reconciler: self.reconciler.clone(),
            queue: self.queue.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: Store, E: EventSink> Controller<S, E> {
    pub fn new(
        reconciler: Reconciler<S, E>,
        queue: Queue<String>,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue,
            metrics,
        }
    }

    /// Waits for the caches to sync and then runs `workers` workers until
    /// shutdown is signaled.
    ///
    /// In-flight syncs complete before the shutdown is released; keys that
    /// are still queued are abandoned.
    pub async fn run(self, workers: usize, drain: drain::Watch) -> Result<()> {
        let signaled = drain.signaled();
        tokio::pin!(signaled);

        tokio::select! {
            res = self.reconciler.store().wait_until_synced() => {
                res.context("failed to sync caches")?;
            }
            release = &mut signaled => {
                tracing::info!("Shutdown signaled before caches synced");
                drop(release);
                return Ok(());
            }
        }

        tracing::info!(workers, "Caches synced; starting workers");
        let handles = (0..workers)
            .map(|id| tokio::spawn(self.clone().worker().instrument(info_span!("worker", id))))
            .collect::<Vec<_>>();

        let release = signaled.await;
        tracing::info!("Shutting down");
        self.queue.shut_down();
        release
            .release_after(async move {
                for handle in handles {
                    if let Err(error) = handle.await {
                        tracing::error!(%error, "Worker failed");
                    }
                }
            })
            .await;
        Ok(())
    }

    async fn worker(self) {
        while let Some(key) = self.queue.get().await {
            let started = time::Instant::now();
            let res = self
                .reconciler
                .sync(&key)
                .instrument(info_span!("sync", %key))
                .await;
            tracing::debug!(%key, elapsed = ?started.elapsed(), "Finished syncing");
            self.metrics.sync_duration(started);
            self.handle_result(&key, res);
            self.queue.done(&key);
        }
    }

    /// Forgets a key once it syncs, or once it has failed too often;
    /// otherwise requeues it with backoff.
    pub(crate) fn handle_result(&self, key: &String, res: Result<(), SyncError>) -> SyncResult {
        let result = match res {
            Ok(()) => {
                self.queue.forget(key);
                SyncResult::Ok
            }
            Err(error) if error.is_terminal() => {
                tracing::error!(%key, %error, "Dropping key");
                self.queue.forget(key);
                SyncResult::Dropped
            }
            Err(error) if self.queue.num_requeues(key) < MAX_RETRIES => {
                tracing::debug!(%key, %error, "Failed to sync; retrying");
                self.queue.add_rate_limited(key.clone());
                SyncResult::Retry
            }
            Err(error) => {
                tracing::error!(%key, %error, retries = MAX_RETRIES, "Dropping service out of the queue");
                self.queue.forget(key);
                SyncResult::Dropped
            }
        };
        self.metrics.sync(result);
        result
    }
}
