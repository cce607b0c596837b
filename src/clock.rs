//! Scheduler.
//!
//! Registers periodic tasks with jitter and drains them cleanly on
//! shutdown.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type Task = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Registration {
    name: String,
    period: Duration,
    jitter_fraction: f64,
}

/// Registers periodic tasks and runs each on its own `tokio` interval with
/// jitter, shutting all of them down together on `shutdown()`.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    registrations: Mutex<Vec<Registration>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Register a periodic task. `jitter_fraction` of 0.10 means each
    /// firing is delayed by up to ±10% of `period`, to avoid synchronized
    /// bursts across a fleet of engines.
    pub fn every<F, Fut>(self: &Arc<Self>, name: impl Into<String>, period: Duration, jitter_fraction: f64, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        self.registrations.lock().push(Registration {
            name: name.clone(),
            period,
            jitter_fraction,
        });

        let mut shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            loop {
                let delay = jittered_period(period, jitter_fraction);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!(task = %name, "scheduler task stopped");
                            return;
                        }
                    }
                }
                if *shutdown_rx.borrow() {
                    return;
                }
                task().await;
            }
        });
        self.handles.lock().push(handle);
    }

    /// Names and configured periods of every registered task, for
    /// introspection/testing.
    pub fn registrations(&self) -> Vec<(String, Duration, f64)> {
        self.registrations
            .lock()
            .iter()
            .map(|r| (r.name.clone(), r.period, r.jitter_fraction))
            .collect()
    }

    /// Signal all tasks to stop and await their current iteration
    /// finishing (graceful shutdown drain).
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn jittered_period(period: Duration, jitter_fraction: f64) -> Duration {
    if jitter_fraction <= 0.0 {
        return period;
    }
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-jitter_fraction..=jitter_fraction);
    Duration::from_secs_f64((period.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn jitter_stays_within_band() {
        for _ in 0..1000 {
            let d = jittered_period(Duration::from_secs(100), 0.10);
            assert!(d.as_secs_f64() >= 90.0 && d.as_secs_f64() <= 110.0);
        }
    }

    #[tokio::test]
    async fn scheduler_runs_and_drains() {
        let scheduler = Arc::new(Scheduler::new());
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        scheduler.every("test-task", Duration::from_millis(10), 0.0, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        scheduler.shutdown().await;
        assert!(counter.load(Ordering::SeqCst) >= 3);
    }
}
