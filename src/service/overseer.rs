//! Periodic background sweepers.
//!
//! The request overseer expires outstanding requests past their deadline;
//! the lobby overseer evicts sockets that never identified. Both are plain
//! tokio tasks that can be paused, resumed and stopped.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::service::lobby::Lobby;
use crate::service::registry::ConnectionRegistry;
use crate::utils::metrics::Metrics;

pub struct Overseer {
    name: &'static str,
    paused: Arc<AtomicBool>,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Overseer {
    /// Run `sweep` every `interval` until stopped. `sweep` returns how many
    /// entries it acted on.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut sweep: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = usize> + Send + 'static,
    {
        let paused = Arc::new(AtomicBool::new(false));
        let stop = CancellationToken::new();

        let task = {
            let paused = paused.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            if paused.load(Ordering::Acquire) {
                                continue;
                            }
                            let swept = sweep().await;
                            if swept > 0 {
                                debug!(overseer = name, swept, "Sweep acted");
                            }
                        }
                    }
                }
                debug!(overseer = name, "Overseer stopped");
            })
        };

        info!(overseer = name, interval_ms = interval.as_millis() as u64, "Overseer started");
        Self {
            name,
            paused,
            stop,
            task: Mutex::new(Some(task)),
        }
    }

    /// Expire overdue requests on every registered connection
    pub fn requests(registry: Arc<ConnectionRegistry>, interval: Duration, metrics: Arc<Metrics>) -> Self {
        Self::spawn("requests", interval, move || {
            let expired = registry.sweep_requests(Instant::now());
            if expired > 0 {
                metrics.requests_expired(expired as u64);
            }
            std::future::ready(expired)
        })
    }

    /// Close lobby connections older than `grace`
    pub fn lobby(lobby: Arc<Lobby>, grace: Duration, interval: Duration, metrics: Arc<Metrics>) -> Self {
        Self::spawn("lobby", interval, move || {
            let lobby = lobby.clone();
            let metrics = metrics.clone();
            async move {
                let evicted = lobby.sweep(grace).await;
                if evicted > 0 {
                    metrics.lobby_evicted(evicted as u64);
                }
                evicted
            }
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Skip sweeps until [`Overseer::resume`]. The task stays alive.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.stop.is_cancelled()
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(&self) {
        self.stop.cancel();
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Overseer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(interval: Duration) -> (Overseer, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let overseer = Overseer::spawn("test", interval, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(0)
        });
        (overseer, ticks)
    }

    #[tokio::test]
    async fn test_sweeps_periodically() {
        let (overseer, ticks) = counting(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        overseer.stop().await;
        assert!(!overseer.is_running());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (overseer, ticks) = counting(Duration::from_millis(10));
        overseer.pause();
        assert!(overseer.is_paused());
        // let an in-flight tick settle
        tokio::time::sleep(Duration::from_millis(20)).await;
        let frozen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), frozen);

        overseer.resume();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(ticks.load(Ordering::SeqCst) > frozen);
        overseer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (overseer, ticks) = counting(Duration::from_millis(10));
        overseer.stop().await;
        overseer.stop().await;
        let after = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }
}
