//! Job definitions
//!
//! A [`Job`] pairs an async callback with a [`Trigger`]. Jobs are cheap to
//! clone: the trigger and callback are shared behind `Arc`s.

use crate::error::BoxError;
use crate::trigger::Trigger;
use chrono::DateTime;
use chrono_tz::Tz;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Future produced by one invocation of a job body
pub type JobFuture = BoxFuture<'static, std::result::Result<(), BoxError>>;

/// Job body, invoked once per firing
pub type JobCallback = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wrap an async closure as a [`JobCallback`]
///
/// ```
/// use a3s_scheduler::job_fn;
///
/// let callback = job_fn(|| async {
///     println!("tick");
///     Ok::<(), std::io::Error>(())
/// });
/// ```
pub fn job_fn<F, Fut, E>(f: F) -> JobCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    Arc::new(move || {
        let fut = f();
        Box::pin(async move {
            let result: std::result::Result<(), BoxError> = fut.await.map_err(Into::into);
            result
        }) as JobFuture
    })
}

/// A scheduled unit of work
#[derive(Clone)]
pub struct Job {
    /// Unique identifier within one job store
    pub id: String,

    /// Recurrence rule
    pub trigger: Arc<dyn Trigger>,

    /// Next scheduled run; computed on registration when absent
    pub next_run_time: Option<DateTime<Tz>>,

    /// Allow overlapping executions of this job (default: true)
    pub run_concurrently: bool,

    /// Runtime the body is spawned on; `None` uses the scheduler's runtime
    pub runtime: Option<Handle>,

    callback: JobCallback,
}

impl Job {
    /// Create a new job
    pub fn new(
        id: impl Into<String>,
        trigger: impl Trigger + 'static,
        callback: JobCallback,
    ) -> Self {
        Self {
            id: id.into(),
            trigger: Arc::new(trigger),
            next_run_time: None,
            run_concurrently: true,
            runtime: None,
            callback,
        }
    }

    /// Create a job from an already shared trigger
    pub fn with_shared_trigger(
        id: impl Into<String>,
        trigger: Arc<dyn Trigger>,
        callback: JobCallback,
    ) -> Self {
        Self {
            id: id.into(),
            trigger,
            next_run_time: None,
            run_concurrently: true,
            runtime: None,
            callback,
        }
    }

    /// Set the first run time explicitly
    pub fn with_next_run_time(mut self, next_run_time: DateTime<Tz>) -> Self {
        self.next_run_time = Some(next_run_time);
        self
    }

    /// Allow or forbid overlapping executions
    pub fn run_concurrently(mut self, run_concurrently: bool) -> Self {
        self.run_concurrently = run_concurrently;
        self
    }

    /// Spawn the body on a specific runtime
    pub fn on_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Apply [`JobOptions`]
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.run_concurrently = options.run_concurrently;
        self.runtime = options.runtime;
        self
    }

    /// Start one invocation of the body
    pub fn invoke(&self) -> JobFuture {
        (self.callback)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .field("next_run_time", &self.next_run_time)
            .field("run_concurrently", &self.run_concurrently)
            .field("runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}

/// Execution options for the scheduler's convenience constructors
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Allow overlapping executions (default: true)
    pub run_concurrently: bool,

    /// Runtime the body is spawned on
    pub runtime: Option<Handle>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            run_concurrently: true,
            runtime: None,
        }
    }
}

impl JobOptions {
    /// Forbid overlapping executions
    pub fn non_concurrent() -> Self {
        Self {
            run_concurrently: false,
            runtime: None,
        }
    }

    /// Spawn the body on a specific runtime
    pub fn on_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::IntervalTrigger;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> JobCallback {
        job_fn(|| async { Ok::<(), BoxError>(()) })
    }

    #[test]
    fn test_job_defaults() {
        let job = Job::new("job-1", IntervalTrigger::new(5).unwrap(), noop());
        assert_eq!(job.id, "job-1");
        assert!(job.run_concurrently);
        assert!(job.next_run_time.is_none());
        assert!(job.runtime.is_none());
    }

    #[test]
    fn test_job_builder() {
        let options = JobOptions::non_concurrent();
        let job = Job::new("job-1", IntervalTrigger::new(5).unwrap(), noop()).with_options(options);
        assert!(!job.run_concurrently);

        let job = job.run_concurrently(true);
        assert!(job.run_concurrently);
    }

    #[tokio::test]
    async fn test_invoke_runs_body_each_time() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let callback = job_fn(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        });
        let job = Job::new("counted", IntervalTrigger::new(1).unwrap(), callback);

        job.invoke().await.unwrap();
        job.clone().invoke().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invoke_maps_error() {
        let callback = job_fn(|| async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
        });
        let job = Job::new("failing", IntervalTrigger::new(1).unwrap(), callback);

        let err = job.invoke().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_job_debug_hides_callback() {
        let job = Job::new("dbg", IntervalTrigger::new(5).unwrap(), noop());
        let debug = format!("{:?}", job);
        assert!(debug.contains("dbg"));
        assert!(debug.contains("IntervalTrigger"));
    }
}
