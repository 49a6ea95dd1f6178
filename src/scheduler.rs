//! Tick-driven job scheduler
//!
//! The [`Scheduler`] owns the tick loop. Every tick it asks the job store
//! for due jobs, drops the paused ones, writes back each job's next run
//! time (or retires the job), and only then hands the job to the executor.
//! Writing back first keeps a slow job from being picked up again by the
//! next tick.
//!
//! Ticks are serialized: a tick loop left over from before a restart, or a
//! manual [`Scheduler::process_due_jobs`] call, never evaluates the same
//! occurrence as another tick. A tick interrupted by shutdown stops before
//! the next dispatch and puts back any occurrence it consumed but did not run.

use crate::config::SchedulerConfig;
use crate::error::{BoxError, Result, SchedulerError};
use crate::event::{EventDispatcher, JobEvent, JobEventListener};
use crate::executor::JobExecutor;
use crate::job::{job_fn, Job, JobOptions};
use crate::store::{is_due, JobStore, MemoryJobStore};
use crate::trigger::{CronTrigger, DailyTrigger, IntervalTrigger, OneTimeTrigger, Trigger};
use chrono::{DateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Created, never started
    NotStarted,
    /// Tick loop active
    Running,
    /// Tick loop cancelled; may be started again
    ShutDown,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::NotStarted => write!(f, "not_started"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::ShutDown => write!(f, "shut_down"),
        }
    }
}

struct Lifecycle {
    state: SchedulerState,
    /// Cancels the tick loop; present while running
    scope: Option<CancellationToken>,
}

struct SchedulerInner {
    store: Arc<dyn JobStore>,
    config: SchedulerConfig,
    timezone: Tz,
    max_grace: Option<chrono::Duration>,
    executor: JobExecutor,
    events: Arc<EventDispatcher>,
    paused: AtomicBool,
    paused_jobs: RwLock<HashSet<String>>,
    lifecycle: Mutex<Lifecycle>,
    /// Held for the duration of one tick
    tick_lock: tokio::sync::Mutex<()>,
}

/// In-process job scheduler
///
/// Cheap to clone; clones share the same jobs, listeners and tick loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler backed by an in-memory job store
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_store(Arc::new(MemoryJobStore::new()), config)
    }

    /// Create a scheduler with a custom job store
    pub fn with_store(store: Arc<dyn JobStore>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let timezone = config.resolve_timezone()?;
        let max_grace = config
            .max_grace_time
            .map(chrono::Duration::from_std)
            .transpose()
            .map_err(|e| SchedulerError::Config(format!("max grace time out of range: {e}")))?;

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                store,
                config,
                timezone,
                max_grace,
                executor: JobExecutor::new(),
                events: Arc::new(EventDispatcher::default()),
                paused: AtomicBool::new(false),
                paused_jobs: RwLock::new(HashSet::new()),
                lifecycle: Mutex::new(Lifecycle {
                    state: SchedulerState::NotStarted,
                    scope: None,
                }),
                tick_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Time zone all run times are computed in
    pub fn timezone(&self) -> Tz {
        self.inner.timezone
    }

    /// Current time in the scheduler's time zone
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.inner.timezone)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Current lifecycle state
    pub fn state(&self) -> SchedulerState {
        self.lifecycle().state
    }

    /// Check if the tick loop is running
    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Start the tick loop on the current Tokio runtime
    ///
    /// Returns immediately. Fails with [`SchedulerError::AlreadyRunning`]
    /// if the scheduler is running; a shut-down scheduler may be restarted.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::NoRuntime(e.to_string()))?;

        let mut lifecycle = self.lifecycle();
        if lifecycle.state == SchedulerState::Running {
            return Err(SchedulerError::AlreadyRunning);
        }

        let scope = CancellationToken::new();
        runtime.spawn(tick_loop(self.inner.clone(), scope.clone()));
        lifecycle.scope = Some(scope);
        lifecycle.state = SchedulerState::Running;
        drop(lifecycle);

        tracing::info!(
            timezone = %self.inner.timezone,
            tick_ms = self.inner.config.tick_interval.as_millis() as u64,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop the tick loop
    ///
    /// A tick in progress dispatches nothing further once this returns.
    /// Jobs already dispatched keep running to completion. Fails with
    /// [`SchedulerError::NotRunning`] unless the scheduler is running.
    pub fn shutdown(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != SchedulerState::Running {
            return Err(SchedulerError::NotRunning);
        }

        if let Some(scope) = lifecycle.scope.take() {
            scope.cancel();
        }
        lifecycle.state = SchedulerState::ShutDown;
        drop(lifecycle);

        tracing::info!("Scheduler shut down");
        Ok(())
    }

    /// Wait until the scheduler is shut down
    ///
    /// Resolves once `shutdown()` is called from elsewhere. Ctrl-C while
    /// waiting shuts the scheduler down. Returns at once if not running.
    pub async fn idle(&self) {
        let Some(scope) = self.scope() else {
            return;
        };

        tokio::select! {
            _ = scope.cancelled() => {}
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    tracing::info!("Interrupted, shutting down scheduler");
                    // Someone else may have shut down in the meantime.
                    let _ = self.shutdown();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to listen for interrupt");
                    scope.cancelled().await;
                }
            },
        }
    }

    fn scope(&self) -> Option<CancellationToken> {
        self.lifecycle().scope.clone()
    }

    /// Wait until every dispatched job has finished
    pub async fn wait_idle(&self) {
        self.inner.executor.wait_idle().await;
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Pause / resume
    // ------------------------------------------------------------------------

    /// Stop dispatching jobs until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        tracing::info!("Scheduler paused");
    }

    /// Resume dispatching; overdue jobs fire on the next tick
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        tracing::info!("Scheduler resumed");
    }

    /// Check if the scheduler is globally paused
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Skip a single job until [`resume_job`](Self::resume_job)
    pub fn pause_job(&self, job_id: &str) {
        self.inner
            .paused_jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string());
        tracing::info!(job_id = %job_id, "Job paused");
    }

    /// Resume a paused job
    pub fn resume_job(&self, job_id: &str) {
        self.inner
            .paused_jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
        tracing::info!(job_id = %job_id, "Job resumed");
    }

    /// Check if a job is individually paused
    pub fn is_job_paused(&self, job_id: &str) -> bool {
        self.inner.is_job_paused(job_id)
    }

    /// Ids of individually paused jobs
    pub fn paused_jobs(&self) -> Vec<String> {
        self.inner
            .paused_jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------------

    /// Register a job, replacing any job with the same id
    ///
    /// A job without a next run time gets one from its trigger. Fails with
    /// [`SchedulerError::NoFutureRun`] if the trigger yields none.
    pub async fn add_job(&self, mut job: Job) -> Result<()> {
        if job.next_run_time.is_none() {
            let now = self.now();
            job.next_run_time = job.trigger.next_run_time(&now, &self.inner.timezone);
        }
        let Some(next_run_time) = job.next_run_time else {
            return Err(SchedulerError::NoFutureRun(job.id));
        };

        tracing::info!(job_id = %job.id, next_run = %next_run_time, "Added job");
        self.inner.store.add(job).await
    }

    /// Remove a job; no-op if absent
    pub async fn remove_job(&self, job_id: &str) -> Result<()> {
        self.inner.store.remove(job_id).await?;
        tracing::info!(job_id = %job_id, "Removed job");
        Ok(())
    }

    /// Get a job by id
    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.inner.store.get(job_id).await
    }

    /// List all jobs
    pub async fn get_jobs(&self) -> Result<Vec<Job>> {
        self.inner.store.list().await
    }

    // ------------------------------------------------------------------------
    // Convenience constructors
    // ------------------------------------------------------------------------

    /// Run `body` once at `run_at`; returns the generated job id
    pub async fn run_once<Z, F, Fut, E>(
        &self,
        run_at: DateTime<Z>,
        options: JobOptions,
        body: F,
    ) -> Result<String>
    where
        Z: TimeZone,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.schedule("run_once", OneTimeTrigger::new(run_at), options, body)
            .await
    }

    /// Run `body` every `interval_secs` seconds; returns the generated job id
    pub async fn run_repeating<F, Fut, E>(
        &self,
        interval_secs: u64,
        options: JobOptions,
        body: F,
    ) -> Result<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let trigger = IntervalTrigger::new(interval_secs)?;
        self.schedule("run_repeating", trigger, options, body).await
    }

    /// Run `body` every day at `time`; returns the generated job id
    pub async fn run_daily<F, Fut, E>(
        &self,
        time: NaiveTime,
        options: JobOptions,
        body: F,
    ) -> Result<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.schedule("run_daily", DailyTrigger::new(time), options, body)
            .await
    }

    /// Run `body` on `days` at `time`; returns the generated job id
    pub async fn run_cron<F, Fut, E>(
        &self,
        days: impl IntoIterator<Item = Weekday>,
        time: NaiveTime,
        options: JobOptions,
        body: F,
    ) -> Result<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let trigger = CronTrigger::new(days, time)?;
        self.schedule("run_cron", trigger, options, body).await
    }

    async fn schedule<F, Fut, E>(
        &self,
        prefix: &str,
        trigger: impl Trigger + 'static,
        options: JobOptions,
        body: F,
    ) -> Result<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let job_id = format!("{}-{}", prefix, uuid::Uuid::new_v4());
        let job = Job::new(job_id.clone(), trigger, job_fn(body)).with_options(options);
        self.add_job(job).await?;
        Ok(job_id)
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Register a listener for job outcomes
    pub fn add_event_listener(&self, listener: Arc<dyn JobEventListener>) {
        self.inner.events.add_listener(listener);
    }

    /// Subscribe to job outcomes as a channel
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// Run one tick now: dispatch every due, unpaused job
    ///
    /// This is what the tick loop calls; the global pause flag is not
    /// consulted here. Waits for a tick already in progress to finish.
    pub async fn process_due_jobs(&self) {
        let now = self.now();
        self.inner.process_due_jobs(now, None).await;
    }

    #[cfg(test)]
    pub(crate) async fn process_due_jobs_at(&self, now: DateTime<Tz>) {
        self.inner.process_due_jobs(now, None).await;
    }
}

impl SchedulerInner {
    fn is_job_paused(&self, job_id: &str) -> bool {
        self.paused_jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_id)
    }

    /// One tick at `now`; stops early once `scope` is cancelled
    async fn process_due_jobs(&self, now: DateTime<Tz>, scope: Option<&CancellationToken>) {
        let _tick = self.tick_lock.lock().await;
        let cancelled = || scope.is_some_and(|scope| scope.is_cancelled());
        if cancelled() {
            return;
        }

        // Late jobs are fetched too, so a missed occurrence can be skipped
        // rather than leave the job stuck in the past.
        let due = match self.store.due_jobs(&now, None).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query due jobs");
                return;
            }
        };

        for job in due {
            if cancelled() {
                tracing::debug!("Scheduler shut down, abandoning tick");
                return;
            }
            if self.is_job_paused(&job.id) {
                continue;
            }

            // Reschedule before dispatch so this occurrence is not seen again.
            let next = job.trigger.next_run_time(&now, &self.timezone);
            let rescheduled = match next {
                Some(next) => {
                    tracing::debug!(job_id = %job.id, next_run = %next, "Rescheduled job");
                    self.store.update_next_run_time(&job.id, next).await
                }
                None => {
                    tracing::debug!(job_id = %job.id, "Trigger exhausted, retiring job");
                    self.store.remove(&job.id).await
                }
            };
            if let Err(e) = rescheduled {
                tracing::error!(job_id = %job.id, error = %e, "Failed to reschedule job");
                continue;
            }

            if !is_due(&job, &now, self.max_grace) {
                tracing::warn!(
                    job_id = %job.id,
                    scheduled = ?job.next_run_time,
                    "Missed grace window, skipping occurrence"
                );
                continue;
            }

            if cancelled() {
                self.restore(job, next.is_some()).await;
                tracing::debug!("Scheduler shut down, abandoning tick");
                return;
            }

            self.dispatch(&job);
        }
    }

    /// Undo the write-back of an occurrence that was never dispatched
    async fn restore(&self, job: Job, still_stored: bool) {
        let restored = match job.next_run_time {
            Some(previous) if still_stored => {
                self.store.update_next_run_time(&job.id, previous).await
            }
            _ => self.store.add(job.clone()).await,
        };
        if let Err(e) = restored {
            tracing::error!(job_id = %job.id, error = %e, "Failed to restore pending occurrence");
        }
    }

    fn dispatch(&self, job: &Job) {
        let events = self.events.clone();
        let timezone = self.timezone;
        let job_id = job.id.clone();
        self.executor.execute(job, move |outcome| {
            let timestamp = Utc::now().with_timezone(&timezone);
            let event = match outcome {
                Ok(()) => JobEvent::success(job_id, timestamp),
                Err(error) => {
                    tracing::warn!(job_id = %job_id, error = %error, "Job failed");
                    JobEvent::failure(job_id, timestamp, error)
                }
            };
            events.emit(event);
        });
    }
}

async fn tick_loop(inner: Arc<SchedulerInner>, scope: CancellationToken) {
    let mut ticker = interval(inner.config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = scope.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if inner.paused.load(Ordering::SeqCst) {
            continue;
        }
        let now = Utc::now().with_timezone(&inner.timezone);
        inner.process_due_jobs(now, Some(&scope)).await;
    }

    tracing::debug!("Tick loop stopped");
}
