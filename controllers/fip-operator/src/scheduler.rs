//! Supervised periodic tasks.
//!
//! Two duties run on timers: the guest cluster sweep and the deferred
//! metrics cleanup, the latter at half the sweep period. Each runs in its own
//! task with a shutdown channel. A run always completes before the task looks
//! at the channel again, so stopping a task waits for an in-flight sweep
//! instead of cutting it short.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

/// Work executed on every tick of a [`PeriodicTask`].
#[async_trait::async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(&self);
}

/// A spawned timer loop driving one job.
pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawns the loop. The first run happens one full period from now.
    pub fn spawn(job: Arc<dyn PeriodicJob>, period: Duration) -> Self {
        let name = job.name();
        let (shutdown, mut signal) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("Periodic task {} started ({:?})", name, period);

            loop {
                tokio::select! {
                    biased;
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                    _ = timer.tick() => job.run().await,
                }
            }
            debug!("Periodic task {} stopped", name);
        });

        Self { name, shutdown, handle }
    }

    /// Signals the loop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!("Periodic task {} panicked: {}", self.name, e);
        }
    }
}

/// Cleanup runs at half the sweep period, but never more often than this.
const MIN_CLEANUP_PERIOD: Duration = Duration::from_secs(1);

pub fn cleanup_period(sweep_period: Duration) -> Duration {
    (sweep_period / 2).max(MIN_CLEANUP_PERIOD)
}

struct Running {
    period: Duration,
    sweep: PeriodicTask,
    cleanup: PeriodicTask,
}

/// Owns the sweep and cleanup tasks and restarts them on interval changes.
pub struct Scheduler {
    sweep: Arc<dyn PeriodicJob>,
    cleanup: Arc<dyn PeriodicJob>,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(sweep: Arc<dyn PeriodicJob>, cleanup: Arc<dyn PeriodicJob>) -> Self {
        Self {
            sweep,
            cleanup,
            running: Mutex::new(None),
        }
    }

    /// Current sweep period, if started.
    pub async fn period(&self) -> Option<Duration> {
        self.running.lock().await.as_ref().map(|r| r.period)
    }

    /// Starts both tasks at `period`, replacing running ones. Returns false
    /// when already running at that period.
    pub async fn reschedule(&self, period: Duration) -> bool {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| r.period == period) {
            return false;
        }

        if let Some(old) = running.take() {
            info!("Sweep interval changed from {:?} to {:?}", old.period, period);
            old.sweep.stop().await;
            old.cleanup.stop().await;
        } else {
            info!("Sweep scheduled every {:?}", period);
        }

        *running = Some(Running {
            period,
            sweep: PeriodicTask::spawn(self.sweep.clone(), period),
            cleanup: PeriodicTask::spawn(self.cleanup.clone(), cleanup_period(period)),
        });
        true
    }

    /// Stops both tasks, waiting for an in-flight run.
    pub async fn shutdown(&self) {
        if let Some(old) = self.running.lock().await.take() {
            old.sweep.stop().await;
            old.cleanup.stop().await;
            info!("Scheduler stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingJob {
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        work: Duration,
    }

    impl CountingJob {
        fn with_work(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                work,
                ..Self::default()
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PeriodicJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cleanup_period() {
        assert_eq!(cleanup_period(Duration::from_secs(480)), Duration::from_secs(240));
        assert_eq!(cleanup_period(Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_leaves_one_timer() {
        let sweep = CountingJob::with_work(Duration::from_secs(5));
        let cleanup = CountingJob::with_work(Duration::ZERO);
        let scheduler = Scheduler::new(sweep.clone(), cleanup.clone());

        assert!(scheduler.reschedule(Duration::from_secs(480)).await);
        assert!(!scheduler.reschedule(Duration::from_secs(480)).await);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(sweep.runs(), 0);

        // t=100: new timer fires at 340 and 580; the old one would add 480
        assert!(scheduler.reschedule(Duration::from_secs(240)).await);
        assert_eq!(scheduler.period().await, Some(Duration::from_secs(240)));
        tokio::time::sleep(Duration::from_secs(590)).await;

        assert_eq!(sweep.runs(), 2);
        assert_eq!(sweep.max_active.load(Ordering::SeqCst), 1);
        // cleanup every 120s from t=100: 220, 340, 460, 580
        assert_eq!(cleanup.runs(), 4);

        scheduler.shutdown().await;
        assert_eq!(scheduler.period().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_running_job() {
        let job = CountingJob::with_work(Duration::from_secs(30));
        let task = PeriodicTask::spawn(job.clone(), Duration::from_secs(10));

        // t=15: the first run started at t=10 and is still going
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(job.active.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        task.stop().await;
        assert_eq!(job.runs(), 1);
        assert_eq!(job.active.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() >= Duration::from_secs(25));
    }
}
