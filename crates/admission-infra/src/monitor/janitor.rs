//! Periodic maintenance driven by an injected ticker.
//!
//! Production uses [`IntervalTicker`]; tests drive ticks through an `mpsc` channel
//! so cleanup runs exactly when the test says so.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Something the janitor cleans on every tick.
#[async_trait]
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drop stale state. Returns the number of entries removed.
    async fn sweep(&self) -> usize;
}

/// Source of janitor ticks.
#[async_trait]
pub trait Ticker: Send + 'static {
    /// Wait for the next tick. `false` means the source is exhausted.
    async fn tick(&mut self) -> bool;
}

/// Fixed-period ticker. The first tick fires one period after creation.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

#[async_trait]
impl Ticker for mpsc::Receiver<()> {
    async fn tick(&mut self) -> bool {
        self.recv().await.is_some()
    }
}

/// Runs every registered [`Sweep`] target on each tick.
#[derive(Default, Clone)]
pub struct Janitor {
    targets: Vec<Arc<dyn Sweep>>,
}

impl Janitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: Arc<dyn Sweep>) -> Self {
        self.targets.push(target);
        self
    }

    /// Sweep every target once. Returns the total removed.
    pub async fn run_once(&self) -> usize {
        let mut total = 0;
        for target in &self.targets {
            let removed = target.sweep().await;
            tracing::debug!(target = target.name(), removed, "Sweep finished");
            total += removed;
        }
        total
    }

    /// Spawn the maintenance loop. Requires a Tokio runtime.
    pub fn start<T: Ticker>(self, mut ticker: T) -> JanitorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            tracing::info!(targets = self.targets.len(), "Janitor started");

            loop {
                tokio::select! {
                    // Pending ticks drain before shutdown is observed
                    biased;
                    more = ticker.tick() => {
                        if !more {
                            break;
                        }
                        self.run_once().await;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            tracing::info!("Janitor stopped");
        });

        JanitorHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle to a running janitor.
pub struct JanitorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!(error = %e, "Janitor task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSweep {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Sweep for CountingSweep {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn sweep(&self) -> usize {
            self.runs.fetch_add(1, Ordering::SeqCst);
            2
        }
    }

    #[tokio::test]
    async fn test_run_once_sums_targets() {
        let a = Arc::new(CountingSweep::default());
        let b = Arc::new(CountingSweep::default());
        let janitor = Janitor::new().with_target(a.clone()).with_target(b.clone());

        assert_eq!(janitor.run_once().await, 4);
        assert_eq!(a.runs.load(Ordering::SeqCst), 1);
        assert_eq!(b.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_ticks_drive_sweeps() {
        let target = Arc::new(CountingSweep::default());
        let (tx, rx) = mpsc::channel(4);
        let handle = Janitor::new().with_target(target.clone()).start(rx);

        tx.send(()).await.unwrap();
        tx.send(()).await.unwrap();
        drop(tx);
        handle.stop().await;

        assert_eq!(target.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_without_ticks() {
        let target = Arc::new(CountingSweep::default());
        let (_tx, rx) = mpsc::channel::<()>(1);
        let handle = Janitor::new().with_target(target.clone()).start(rx);

        handle.stop().await;
        assert_eq!(target.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticker_fires_after_period() {
        let target = Arc::new(CountingSweep::default());
        let handle = Janitor::new()
            .with_target(target.clone())
            .start(IntervalTicker::new(Duration::from_secs(3600)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(target.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(target.runs.load(Ordering::SeqCst), 1);

        handle.stop().await;
    }
}
