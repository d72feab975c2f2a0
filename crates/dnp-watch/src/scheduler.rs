//! Periodic task runner.
//!
//! Every periodic piece of work in the daemon is registered here instead of
//! starting its own timer. A task ticks on a fixed interval after an
//! optional initial delay. If the previous run is still in flight when a
//! tick fires, the tick is skipped. Errors and panics of a run are logged
//! and never stop the task.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dnp_common::DnpResult;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Shortest interval a task may tick at; a zero interval is raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Unit of work run on every tick.
#[async_trait]
pub trait Job: Send + Sync {
    /// Run once.
    ///
    /// # Errors
    ///
    /// A returned error is logged by the scheduler; the task keeps ticking.
    async fn run(&self) -> DnpResult<()>;
}

/// Adapts an async closure into a [`Job`].
pub struct JobFn<F>(pub F);

#[async_trait]
impl<F, Fut> Job for JobFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = DnpResult<()>> + Send,
{
    async fn run(&self) -> DnpResult<()> {
        (self.0)().await
    }
}

/// Timing of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Name used in logs.
    pub name: String,
    /// Time between ticks.
    pub interval: Duration,
    /// Time before the first tick.
    pub initial_delay: Duration,
}

impl TaskSpec {
    /// A task ticking every `interval`, starting immediately.
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            initial_delay: Duration::ZERO,
        }
    }

    /// Delay the first tick.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct TaskStats {
    runs: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

struct TaskInner {
    name: String,
    stop: watch::Sender<bool>,
    stats: TaskStats,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a scheduled task.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

impl TaskHandle {
    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Stop ticking. A run in flight is left to finish.
    pub fn stop(&self) {
        self.inner.stop.send_replace(true);
    }

    /// Whether [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Runs that completed successfully.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.inner.stats.runs.load(Ordering::Relaxed)
    }

    /// Runs that returned an error or panicked.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.inner.stats.failures.load(Ordering::Relaxed)
    }

    /// Ticks dropped because the previous run was still in flight.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.inner.stats.skipped.load(Ordering::Relaxed)
    }

    /// Wait until the task has stopped and its last run has finished.
    pub async fn join(&self) {
        let driver = self.inner.driver.lock().take();
        let Some(driver) = driver else {
            return;
        };
        if let Err(e) = driver.await {
            tracing::error!(task = %self.inner.name, error = %e, "Task driver aborted");
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.inner.name)
            .field("stopped", &self.is_stopped())
            .field("runs", &self.runs())
            .field("failures", &self.failures())
            .field("skipped", &self.skipped())
            .finish()
    }
}

/// Registry of periodic tasks.
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: Mutex<Vec<TaskHandle>>,
}

impl Scheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking `job` according to `spec`.
    ///
    /// A zero interval is raised to [`MIN_INTERVAL`].
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, mut spec: TaskSpec, job: Arc<dyn Job>) -> TaskHandle {
        if spec.interval.is_zero() {
            tracing::warn!(
                task = %spec.name,
                interval = ?MIN_INTERVAL,
                "Zero interval requested, using the minimum"
            );
            spec.interval = MIN_INTERVAL;
        }
        let (stop, stop_rx) = watch::channel(false);
        let inner = Arc::new(TaskInner {
            name: spec.name.clone(),
            stop,
            stats: TaskStats::default(),
            driver: Mutex::new(None),
        });

        tracing::debug!(
            task = %spec.name,
            interval_secs = spec.interval.as_secs_f64(),
            initial_delay_secs = spec.initial_delay.as_secs_f64(),
            "Scheduling task"
        );

        let driver = tokio::spawn(drive(spec, job, Arc::clone(&inner), stop_rx));
        *inner.driver.lock() = Some(driver);

        let handle = TaskHandle { inner };
        self.tasks.lock().push(handle.clone());
        handle
    }

    /// Handle of a task by name.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<TaskHandle> {
        self.tasks.lock().iter().find(|t| t.name() == name).cloned()
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Stop every task and wait for in-flight runs to drain.
    pub async fn shutdown(&self) {
        let tasks: Vec<TaskHandle> = self.tasks.lock().clone();
        for task in &tasks {
            task.stop();
        }
        for task in &tasks {
            task.join().await;
        }
        tracing::debug!(tasks = tasks.len(), "Scheduler drained");
    }
}

async fn drive(
    spec: TaskSpec,
    job: Arc<dyn Job>,
    inner: Arc<TaskInner>,
    mut stop: watch::Receiver<bool>,
) {
    if !spec.initial_delay.is_zero() {
        tokio::select! {
            () = tokio::time::sleep(spec.initial_delay) => {}
            _ = stop.changed() => return,
        }
    }

    let mut ticker = tokio::time::interval(spec.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        if in_flight.as_ref().is_some_and(|run| !run.is_finished()) {
            inner.stats.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(task = %spec.name, "Previous run still in progress, skipping tick");
            continue;
        }

        let job = Arc::clone(&job);
        let inner = Arc::clone(&inner);
        in_flight = Some(tokio::spawn(async move { run_once(&job, &inner).await }));
    }

    if let Some(run) = in_flight {
        let _ = run.await;
    }
    tracing::debug!(task = %spec.name, "Task stopped");
}

async fn run_once(job: &Arc<dyn Job>, inner: &TaskInner) {
    let started = Instant::now();
    match AssertUnwindSafe(job.run()).catch_unwind().await {
        Ok(Ok(())) => {
            inner.stats.runs.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                task = %inner.name,
                elapsed_ms = started.elapsed().as_millis(),
                "Task run finished"
            );
        }
        Ok(Err(e)) => {
            inner.stats.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(task = %inner.name, error = %e, "Task run failed");
        }
        Err(_) => {
            inner.stats.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(task = %inner.name, "Task run panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use dnp_common::DnpError;

    struct Counting {
        started: AtomicU64,
        busy_for: Duration,
        fail: bool,
    }

    impl Counting {
        fn new(busy_for: Duration) -> Arc<Self> {
            Arc::new(Self {
                started: AtomicU64::new(0),
                busy_for,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicU64::new(0),
                busy_for: Duration::ZERO,
                fail: true,
            })
        }

        fn started(&self) -> u64 {
            self.started.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Job for Counting {
        async fn run(&self) -> DnpResult<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.busy_for).await;
            if self.fail {
                return Err(DnpError::Internal {
                    message: "router on fire".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_after_initial_delay_then_every_interval() {
        let scheduler = Scheduler::new();
        let job = Counting::new(Duration::ZERO);
        let spec = TaskSpec::new("count", Duration::from_secs(10))
            .with_initial_delay(Duration::from_secs(5));
        let handle = scheduler.spawn(spec, job.clone());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(job.started(), 0);

        tokio::time::sleep(Duration::from_secs(22)).await;
        assert_eq!(job.started(), 3);
        assert_eq!(handle.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_ticks_at_the_minimum() {
        let scheduler = Scheduler::new();
        let job = Counting::new(Duration::ZERO);
        let handle = scheduler.spawn(TaskSpec::new("busy", Duration::ZERO), job.clone());

        tokio::time::sleep(MIN_INTERVAL * 2 + MIN_INTERVAL / 2).await;
        assert_eq!(job.started(), 3);
        assert_eq!(handle.runs(), 3);

        handle.stop();
        handle.join().await;
        assert_eq!(handle.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_skipped() {
        let scheduler = Scheduler::new();
        let job = Counting::new(Duration::from_secs(25));
        let handle = scheduler.spawn(TaskSpec::new("slow", Duration::from_secs(10)), job.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(job.started(), 2);
        assert_eq!(handle.skipped(), 2);
        assert_eq!(handle.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_cancel_the_task() {
        let scheduler = Scheduler::new();
        let job = Counting::failing();
        let handle = scheduler.spawn(TaskSpec::new("flaky", Duration::from_secs(10)), job.clone());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(job.started(), 3);
        assert_eq!(handle.failures(), 3);
        assert_eq!(handle.runs(), 0);
    }

    struct Panicking(AtomicU64);

    #[async_trait]
    impl Job for Panicking {
        async fn run(&self) -> DnpResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("bug in watcher");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panics_are_contained() {
        let scheduler = Scheduler::new();
        let job = Arc::new(Panicking(AtomicU64::new(0)));
        let handle = scheduler.spawn(TaskSpec::new("panicky", Duration::from_secs(10)), job.clone());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(job.0.load(Ordering::SeqCst), 2);
        assert_eq!(handle.failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_the_current_run_finish() {
        let scheduler = Scheduler::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let job = JobFn(move || {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<(), DnpError>(())
            }
        });
        let handle = scheduler.spawn(TaskSpec::new("drain", Duration::from_secs(60)), Arc::new(job));

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
        assert!(!finished.load(Ordering::SeqCst));

        scheduler.shutdown().await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(handle.is_stopped());
        assert_eq!(handle.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_task_never_ticks_again() {
        let scheduler = Scheduler::new();
        let job = Counting::new(Duration::ZERO);
        let handle = scheduler.spawn(TaskSpec::new("once", Duration::from_secs(10)), job.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(job.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_initial_delay_skips_everything() {
        let scheduler = Scheduler::new();
        let job = Counting::new(Duration::ZERO);
        let spec = TaskSpec::new("late", Duration::from_secs(10))
            .with_initial_delay(Duration::from_secs(30));
        let handle = scheduler.spawn(spec, job.clone());

        handle.stop();
        scheduler.shutdown().await;
        assert_eq!(job.started(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_are_looked_up_by_name() {
        let scheduler = Scheduler::new();
        scheduler.spawn(
            TaskSpec::new("nat-renewal", Duration::from_secs(10)),
            Counting::new(Duration::ZERO),
        );

        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.task("nat-renewal").is_some());
        assert!(scheduler.task("disk-usage").is_none());
        scheduler.shutdown().await;
    }
}
