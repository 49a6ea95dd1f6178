//! Job execution
//!
//! [`JobExecutor`] launches each firing as its own Tokio task, so a slow or
//! failing job never blocks the tick loop or its siblings. Jobs marked
//! `run_concurrently = false` are guarded by an in-flight registry: a firing
//! that arrives while a previous one is still running is dropped.

use crate::error::JobError;
use crate::job::Job;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::task::TaskTracker;

type InFlight = Arc<Mutex<HashMap<String, usize>>>;

/// Runs job bodies on background tasks
pub struct JobExecutor {
    /// Running invocations per job id
    in_flight: InFlight,
    /// Supervises the per-job tasks
    tracker: TaskTracker,
    /// One drain at a time; the tracker is closed while draining
    idle_lock: tokio::sync::Mutex<()>,
}

impl JobExecutor {
    /// Create an executor with no jobs in flight
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            idle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Launch one execution of `job`
    ///
    /// Returns immediately. `on_done` is called exactly once with the
    /// outcome, unless the firing is suppressed because the job forbids
    /// concurrent runs and is already in flight; then nothing is spawned,
    /// `on_done` is dropped uncalled, and `false` is returned.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn execute<F>(&self, job: &Job, on_done: F) -> bool
    where
        F: FnOnce(std::result::Result<(), JobError>) + Send + 'static,
    {
        let Some(guard) = InFlightGuard::acquire(&self.in_flight, &job.id, job.run_concurrently)
        else {
            tracing::warn!(job_id = %job.id, "Previous run still in flight, skipping firing");
            return false;
        };

        let runtime = job.runtime.clone();
        let job = job.clone();

        self.tracker.spawn(async move {
            // Dropped on every exit path, including abort.
            let _guard = guard;

            let body = async move { job.invoke().await };
            let handle = match runtime {
                Some(runtime) => runtime.spawn(body),
                None => tokio::spawn(body),
            };

            let outcome = match handle.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(JobError::Failed(Arc::from(e))),
                Err(e) if e.is_panic() => Err(JobError::Panicked(panic_message(e.into_panic()))),
                Err(_) => Err(JobError::Cancelled),
            };
            on_done(outcome);
        });

        true
    }

    /// Check if any invocation of `job_id` is running
    pub fn is_in_flight(&self, job_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_id)
    }

    /// Total number of running invocations
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    /// Wait until every launched execution has finished
    ///
    /// Executions launched while waiting are waited for as well. Concurrent
    /// callers drain one after another.
    pub async fn wait_idle(&self) {
        let _drain = self.idle_lock.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Default for JobExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one running invocation; released on drop
struct InFlightGuard {
    in_flight: InFlight,
    job_id: String,
}

impl InFlightGuard {
    fn acquire(in_flight: &InFlight, job_id: &str, run_concurrently: bool) -> Option<Self> {
        let mut running = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !run_concurrently && running.get(job_id).is_some_and(|n| *n > 0) {
            return None;
        }
        *running.entry(job_id.to_string()).or_insert(0) += 1;

        Some(Self {
            in_flight: in_flight.clone(),
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut running = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = running.get_mut(&self.job_id) {
            *count -= 1;
            if *count == 0 {
                running.remove(&self.job_id);
            }
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::job::job_fn;
    use crate::trigger::IntervalTrigger;
    use tokio::sync::Semaphore;

    type Outcomes = Arc<Mutex<Vec<std::result::Result<(), JobError>>>>;

    fn gated_job(id: &str, gate: Arc<Semaphore>, run_concurrently: bool) -> Job {
        let callback = job_fn(move || {
            let gate = gate.clone();
            async move {
                let _permit = gate.acquire().await.map_err(|e| Box::new(e) as BoxError)?;
                Ok::<(), BoxError>(())
            }
        });
        Job::new(id, IntervalTrigger::new(1).unwrap(), callback).run_concurrently(run_concurrently)
    }

    fn recorder(outcomes: &Outcomes) -> impl FnOnce(std::result::Result<(), JobError>) + Send {
        let outcomes = outcomes.clone();
        move |outcome| outcomes.lock().unwrap().push(outcome)
    }

    #[tokio::test]
    async fn test_non_concurrent_suppresses_overlap() {
        let executor = JobExecutor::new();
        let gate = Arc::new(Semaphore::new(0));
        let job = gated_job("exclusive", gate.clone(), false);
        let outcomes: Outcomes = Arc::default();

        assert!(executor.execute(&job, recorder(&outcomes)));
        assert!(!executor.execute(&job, recorder(&outcomes)));
        assert!(!executor.execute(&job, recorder(&outcomes)));
        assert!(executor.is_in_flight("exclusive"));

        gate.add_permits(3);
        executor.wait_idle().await;

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_runs_all() {
        let executor = JobExecutor::new();
        let gate = Arc::new(Semaphore::new(0));
        let job = gated_job("shared", gate.clone(), true);
        let outcomes: Outcomes = Arc::default();

        for _ in 0..3 {
            assert!(executor.execute(&job, recorder(&outcomes)));
        }
        assert_eq!(executor.in_flight_count(), 3);

        gate.add_permits(3);
        executor.wait_idle().await;

        assert_eq!(outcomes.lock().unwrap().len(), 3);
        assert_eq!(executor.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_released_after_completion() {
        let executor = JobExecutor::new();
        let gate = Arc::new(Semaphore::new(10));
        let job = gated_job("again", gate, false);
        let outcomes: Outcomes = Arc::default();

        assert!(executor.execute(&job, recorder(&outcomes)));
        executor.wait_idle().await;
        assert!(!executor.is_in_flight("again"));

        assert!(executor.execute(&job, recorder(&outcomes)));
        executor.wait_idle().await;
        assert_eq!(outcomes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_error_is_reported() {
        let executor = JobExecutor::new();
        let callback = job_fn(|| async { Err::<(), _>("bad input") });
        let job = Job::new("failing", IntervalTrigger::new(1).unwrap(), callback)
            .run_concurrently(false);
        let outcomes: Outcomes = Arc::default();

        executor.execute(&job, recorder(&outcomes));
        executor.wait_idle().await;

        let outcomes = outcomes.lock().unwrap();
        match &outcomes[0] {
            Err(JobError::Failed(e)) => assert_eq!(e.to_string(), "bad input"),
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert!(!executor.is_in_flight("failing"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let executor = JobExecutor::new();
        let callback = job_fn(|| async {
            if true {
                panic!("job exploded");
            }
            Ok::<(), BoxError>(())
        });
        let job = Job::new("panicky", IntervalTrigger::new(1).unwrap(), callback)
            .run_concurrently(false);
        let outcomes: Outcomes = Arc::default();

        executor.execute(&job, recorder(&outcomes));
        executor.wait_idle().await;

        let outcomes = outcomes.lock().unwrap();
        match &outcomes[0] {
            Err(JobError::Panicked(msg)) => assert_eq!(msg, "job exploded"),
            other => panic!("Expected Panicked, got {:?}", other),
        }
        assert!(!executor.is_in_flight("panicky"));
    }

    #[tokio::test]
    async fn test_overlapping_wait_idle_both_return() {
        let executor = Arc::new(JobExecutor::new());
        let gate = Arc::new(Semaphore::new(0));
        let job = gated_job("slow", gate.clone(), true);
        let outcomes: Outcomes = Arc::default();
        executor.execute(&job, recorder(&outcomes));

        let first = tokio::spawn({
            let executor = executor.clone();
            async move { executor.wait_idle().await }
        });
        let second = tokio::spawn({
            let executor = executor.clone();
            async move { executor.wait_idle().await }
        });
        tokio::task::yield_now().await;
        gate.add_permits(1);

        let both = async {
            first.await.unwrap();
            second.await.unwrap();
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), both)
            .await
            .unwrap();
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_runs_on_explicit_runtime() {
        let executor = JobExecutor::new();
        let gate = Arc::new(Semaphore::new(1));
        let job = gated_job("pinned", gate, true).on_runtime(tokio::runtime::Handle::current());
        let outcomes: Outcomes = Arc::default();

        executor.execute(&job, recorder(&outcomes));
        executor.wait_idle().await;
        assert!(outcomes.lock().unwrap()[0].is_ok());
    }
}
