//! # a3s-scheduler
//!
//! In-process, tick-driven job scheduler for the A3S ecosystem.
//!
//! ## Overview
//!
//! Register async jobs paired with a trigger; the scheduler wakes on a
//! fixed tick, finds the jobs that are due, advances their next run time
//! and runs them concurrently on Tokio tasks. Outcomes are reported to
//! event listeners.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_scheduler::{JobOptions, Scheduler, SchedulerConfig};
//!
//! # async fn example() -> a3s_scheduler::Result<()> {
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//!
//! // Every 30 seconds
//! let job_id = scheduler
//!     .run_repeating(30, JobOptions::default(), || async {
//!         println!("heartbeat");
//!         Ok::<(), std::io::Error>(())
//!     })
//!     .await?;
//!
//! scheduler.start()?;
//! scheduler.idle().await;
//! # let _ = job_id;
//! # Ok(())
//! # }
//! ```
//!
//! ## Triggers
//!
//! - **OneTimeTrigger** - a single run at a fixed instant
//! - **IntervalTrigger** - every N seconds
//! - **DailyTrigger** - every day at a local time of day
//! - **CronTrigger** - selected weekdays at a local time of day
//!
//! ## Architecture
//!
//! - **Trigger** trait - computes the next run time
//! - **JobStore** trait - keyed job storage with due-job queries
//! - **JobExecutor** - per-job tasks with non-concurrent run guards
//! - **Scheduler** - tick loop, pause/resume, lifecycle
//! - **JobEventListener** - success/error notifications

pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod job;
pub mod scheduler;
pub mod store;
pub mod trigger;

// Re-export core types
pub use config::SchedulerConfig;
pub use error::{BoxError, JobError, Result, SchedulerError};
pub use event::{EventDispatcher, JobEvent, JobEventListener, JobStatus};
pub use executor::JobExecutor;
pub use job::{job_fn, Job, JobCallback, JobFuture, JobOptions};
pub use scheduler::{Scheduler, SchedulerState};
pub use store::{JobStore, MemoryJobStore};
pub use trigger::{time_of_day, CronTrigger, DailyTrigger, IntervalTrigger, OneTimeTrigger, Trigger};

// Time types used throughout the public API
pub use chrono_tz::Tz;
