use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

/// Bounded worker pool for per-frame handling.
///
/// Read loops hand every decoded frame to [`Dispatcher::submit`] so one slow
/// frame never stalls reading. At most `worker_limit` frames are handled at
/// once across all connections; submission waits for a free slot, which
/// pushes back on the submitting read loop. Submission order is the only
/// ordering between frames.
#[derive(Clone)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
    worker_limit: usize,
}

impl Dispatcher {
    pub fn new(worker_limit: usize) -> Self {
        let worker_limit = worker_limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(worker_limit)),
            worker_limit,
        }
    }

    /// Run `task` on the pool once a worker slot is free
    ///
    /// # Errors
    /// Returns `ProtocolError::ConnectionClosed` after [`Dispatcher::close`].
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        trace!(available = self.permits.available_permits(), "Frame dispatched");
        tokio::spawn(async move {
            let _permit = permit;
            task.await;
        });
        Ok(())
    }

    pub fn worker_limit(&self) -> usize {
        self.worker_limit
    }

    /// Slots not currently running a frame
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse further submissions. Running frames finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_WORKER_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_limit() {
        let dispatcher = Dispatcher::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..12 {
            let running = running.clone();
            let peak = peak.clone();
            let done = done.clone();
            dispatcher
                .submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .expect("dispatcher open");
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while done.load(Ordering::SeqCst) < 12 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all frames handled");

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(dispatcher.available(), 3);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_refuses_work() {
        let dispatcher = Dispatcher::new(2);
        dispatcher.close();
        assert!(matches!(
            dispatcher.submit(async {}).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        assert_eq!(Dispatcher::new(0).worker_limit(), 1);
    }
}
