//! Expiry Sweep Task
//!
//! Background task that periodically removes expired entries from a driver.
//! Each pass removes entries in chunks and yields between chunks, so a large
//! backlog never holds the owner's lock for the whole scan.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DriverError;

// == Sweep Trait ==
/// Something that can drop its expired entries a chunk at a time.
#[async_trait]
pub trait Sweep: Send + Sync {
    /// Removes up to `limit` expired entries and returns how many went.
    async fn sweep_chunk(&self, limit: usize) -> Result<usize, DriverError>;
}

/// Spawns a background task that sweeps `target` every `interval` until
/// `shutdown` is cancelled.
///
/// Passes run one after another on the same task, so a sweep never overlaps
/// with itself.
///
/// # Example
/// ```ignore
/// let token = CancellationToken::new();
/// let handle = spawn_sweep_task("cache".into(), table, Duration::from_secs(1), 1024, token.clone());
/// // Later, during shutdown:
/// token.cancel();
/// handle.await?;
/// ```
pub fn spawn_sweep_task(
    storage: String,
    target: Arc<dyn Sweep>,
    interval: Duration,
    chunk: usize,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let chunk = chunk.max(1);

    tokio::spawn(async move {
        info!(
            storage = %storage,
            "Starting expiry sweep with interval of {:?}", interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match sweep_pass(target.as_ref(), chunk, &shutdown).await {
                Ok(removed) if removed > 0 => {
                    info!(storage = %storage, "Expiry sweep: removed {} expired entries", removed);
                }
                Ok(_) => debug!(storage = %storage, "Expiry sweep: no expired entries found"),
                Err(e) => warn!(storage = %storage, error = %e, "Expiry sweep failed"),
            }
        }

        debug!(storage = %storage, "Expiry sweep stopped");
    })
}

async fn sweep_pass(
    target: &dyn Sweep,
    chunk: usize,
    shutdown: &CancellationToken,
) -> Result<usize, DriverError> {
    let mut total = 0;
    loop {
        let removed = target.sweep_chunk(chunk).await?;
        total += removed;
        if removed < chunk || shutdown.is_cancelled() {
            return Ok(total);
        }
        tokio::task::yield_now().await;
    }
}

// == Sweep Task Handle ==
/// Owns a running sweep. Dropping it cancels the task; `stop` also waits for
/// the in-flight pass to finish.
#[derive(Debug)]
pub struct SweepTask {
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SweepTask {
    pub fn start(storage: &str, target: Arc<dyn Sweep>, interval: Duration, chunk: usize) -> Self {
        let token = CancellationToken::new();
        let handle = spawn_sweep_task(storage.to_string(), target, interval, chunk, token.clone());
        Self {
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Cancels the task and waits for it to exit. Safe to call twice.
    pub async fn stop(&self) {
        self.token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Expiry sweep task ended abnormally");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pretends to hold `pending` expired entries.
    #[derive(Debug)]
    struct Backlog {
        pending: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Backlog {
        fn new(pending: usize) -> Arc<Self> {
            Arc::new(Self {
                pending: AtomicUsize::new(pending),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Sweep for Backlog {
        async fn sweep_chunk(&self, limit: usize) -> Result<usize, DriverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let pending = self.pending.load(Ordering::SeqCst);
            let removed = pending.min(limit);
            self.pending.store(pending - removed, Ordering::SeqCst);
            Ok(removed)
        }
    }

    #[derive(Debug)]
    struct Failing;

    #[async_trait]
    impl Sweep for Failing {
        async fn sweep_chunk(&self, _limit: usize) -> Result<usize, DriverError> {
            Err(DriverError::Storage("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn test_sweep_pass_drains_in_chunks() {
        let backlog = Backlog::new(10);
        let token = CancellationToken::new();

        let removed = sweep_pass(backlog.as_ref(), 3, &token).await.unwrap();

        assert_eq!(removed, 10);
        assert_eq!(backlog.pending.load(Ordering::SeqCst), 0);
        // 3 + 3 + 3 + 1
        assert_eq!(backlog.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_sweep_task_runs_periodically() {
        let backlog = Backlog::new(5);
        let task = SweepTask::start("cache", backlog.clone(), Duration::from_millis(10), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backlog.pending.load(Ordering::SeqCst), 0);

        task.stop().await;
        assert!(task.is_stopped());
    }

    #[tokio::test]
    async fn test_sweep_task_survives_errors() {
        let task = SweepTask::start("broken", Arc::new(Failing), Duration::from_millis(5), 8);

        tokio::time::sleep(Duration::from_millis(50)).await;

        // The loop keeps going after failures and still stops on request
        task.stop().await;
        task.stop().await;
    }

    #[tokio::test]
    async fn test_sweep_task_can_be_stopped_before_first_pass() {
        let backlog = Backlog::new(5);
        let task = SweepTask::start("cache", backlog.clone(), Duration::from_secs(3600), 2);

        task.stop().await;

        assert_eq!(backlog.calls.load(Ordering::SeqCst), 0);
    }
}
