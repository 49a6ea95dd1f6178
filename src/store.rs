//! Job storage layer
//!
//! The scheduler only talks to jobs through the [`JobStore`] trait, so a
//! persistent or shared backend can replace [`MemoryJobStore`] as long as
//! updates for a single job id are visible to the very next query.

use crate::error::Result;
use crate::job::Job;
use async_trait::async_trait;
use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Job storage trait
///
/// All operations may be called concurrently from the tick loop and from
/// any external caller.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job, keyed by its id
    async fn add(&self, job: Job) -> Result<()>;

    /// Remove a job; no-op if absent
    async fn remove(&self, job_id: &str) -> Result<()>;

    /// Look up a job by id
    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// List all jobs, in no particular order
    async fn list(&self) -> Result<Vec<Job>>;

    /// Jobs whose next run time has arrived
    ///
    /// A job is due when `next_run_time <= now`. With `max_grace` set it
    /// must also satisfy `now <= next_run_time + max_grace`; jobs later
    /// than that are left out and are not retried.
    async fn due_jobs(&self, now: &DateTime<Tz>, max_grace: Option<Duration>) -> Result<Vec<Job>>;

    /// Point update of a job's next run time; no-op if the job is gone
    async fn update_next_run_time(&self, job_id: &str, next_run_time: DateTime<Tz>)
        -> Result<()>;

    /// Number of stored jobs
    async fn count(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }
}

/// Check whether a job is due at `now` under an optional grace window
pub fn is_due(job: &Job, now: &DateTime<Tz>, max_grace: Option<Duration>) -> bool {
    let Some(next) = job.next_run_time else {
        return false;
    };
    if next > *now {
        return false;
    }
    match max_grace {
        Some(grace) => next
            .checked_add_signed(grace)
            .map_or(true, |deadline| *now <= deadline),
        None => true,
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory job store
///
/// The default backend. Jobs live in a `HashMap` behind an async `RwLock`.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn add(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(job_id);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(job_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().cloned().collect())
    }

    async fn due_jobs(&self, now: &DateTime<Tz>, max_grace: Option<Duration>) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|job| is_due(job, now, max_grace))
            .cloned()
            .collect())
    }

    async fn update_next_run_time(
        &self,
        job_id: &str,
        next_run_time: DateTime<Tz>,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            job.next_run_time = Some(next_run_time);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.jobs.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::job::{job_fn, JobCallback};
    use crate::trigger::IntervalTrigger;
    use chrono::TimeZone;
    use chrono_tz::UTC;

    fn noop() -> JobCallback {
        job_fn(|| async { Ok::<(), BoxError>(()) })
    }

    fn job_at(id: &str, next: DateTime<Tz>) -> Job {
        Job::new(id, IntervalTrigger::new(60).unwrap(), noop()).with_next_run_time(next)
    }

    fn now() -> DateTime<Tz> {
        UTC.with_ymd_and_hms(2023, 6, 12, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_add_and_get() {
        let store = MemoryJobStore::new();
        store.add(job_at("a", now())).await.unwrap();

        let loaded = store.get("a").await.unwrap();
        assert!(loaded.is_some());
        assert_eq!(loaded.unwrap().next_run_time, Some(now()));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_upsert() {
        let store = MemoryJobStore::new();
        store.add(job_at("a", now())).await.unwrap();
        store
            .add(job_at("a", now() + Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let job = store.get("a").await.unwrap().unwrap();
        assert_eq!(job.next_run_time, Some(now() + Duration::minutes(5)));
    }

    #[tokio::test]
    async fn test_memory_store_remove_is_idempotent() {
        let store = MemoryJobStore::new();
        store.add(job_at("a", now())).await.unwrap();

        store.remove("a").await.unwrap();
        store.remove("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_list() {
        let store = MemoryJobStore::new();
        for i in 1..=3 {
            store.add(job_at(&format!("job-{}", i), now())).await.unwrap();
        }

        let jobs = store.list().await.unwrap();
        assert_eq!(jobs.len(), 3);
    }

    #[tokio::test]
    async fn test_due_jobs_without_grace() {
        let store = MemoryJobStore::new();
        store.add(job_at("past", now() - Duration::days(3))).await.unwrap();
        store.add(job_at("exact", now())).await.unwrap();
        store.add(job_at("future", now() + Duration::seconds(1))).await.unwrap();

        let mut due: Vec<String> = store
            .due_jobs(&now(), None)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        due.sort();
        assert_eq!(due, vec!["exact", "past"]);
    }

    #[tokio::test]
    async fn test_due_jobs_grace_window() {
        let store = MemoryJobStore::new();
        store
            .add(job_at("late", now() - Duration::seconds(30)))
            .await
            .unwrap();

        let within = store
            .due_jobs(&now(), Some(Duration::seconds(60)))
            .await
            .unwrap();
        assert_eq!(within.len(), 1);

        let beyond = store
            .due_jobs(&now(), Some(Duration::seconds(10)))
            .await
            .unwrap();
        assert!(beyond.is_empty());

        // Skipped, not removed.
        assert!(store.get("late").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_due_jobs_grace_boundary_inclusive() {
        let store = MemoryJobStore::new();
        store
            .add(job_at("edge", now() - Duration::seconds(10)))
            .await
            .unwrap();

        let due = store
            .due_jobs(&now(), Some(Duration::seconds(10)))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_update_next_run_time() {
        let store = MemoryJobStore::new();
        store.add(job_at("a", now())).await.unwrap();

        let later = now() + Duration::hours(1);
        store.update_next_run_time("a", later).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().next_run_time, Some(later));
        assert!(store.due_jobs(&now(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_after_remove_is_noop() {
        let store = MemoryJobStore::new();
        store.add(job_at("a", now())).await.unwrap();
        store.remove("a").await.unwrap();

        store.update_next_run_time("a", now()).await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_is_due_without_next_run() {
        let job = Job::new("a", IntervalTrigger::new(60).unwrap(), noop());
        assert!(!is_due(&job, &now(), None));
    }
}
