//! Recurrence rules
//!
//! A trigger is a pure function of the current time and the scheduling
//! time zone. It returns the next run time strictly after `now`, or `None`
//! when the job should not run again.
//!
//! Four triggers ship with the crate:
//!
//! - [`OneTimeTrigger`] - fires once at a fixed instant
//! - [`IntervalTrigger`] - fires every N seconds
//! - [`DailyTrigger`] - fires every day at a time of day
//! - [`CronTrigger`] - fires on selected weekdays at a time of day
//!
//! Any type implementing [`Trigger`] can be attached to a job.

use crate::error::{Result, SchedulerError};
use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
    Weekday,
};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::fmt;

/// Computes the next run time of a job
///
/// Implementations must be stateless with respect to invocation history
/// and safe to call from any thread.
pub trait Trigger: Send + Sync + fmt::Debug {
    /// Next run time strictly after `now`, expressed in `tz`
    fn next_run_time(&self, now: &DateTime<Tz>, tz: &Tz) -> Option<DateTime<Tz>>;
}

// ============================================================================
// One-time
// ============================================================================

/// Fires once at `run_at`, then retires the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneTimeTrigger {
    run_at: DateTime<Utc>,
}

impl OneTimeTrigger {
    /// Create a trigger firing at the given instant
    pub fn new<Z: TimeZone>(run_at: DateTime<Z>) -> Self {
        Self {
            run_at: run_at.with_timezone(&Utc),
        }
    }

    /// The instant this trigger fires at
    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }
}

impl Trigger for OneTimeTrigger {
    fn next_run_time(&self, now: &DateTime<Tz>, tz: &Tz) -> Option<DateTime<Tz>> {
        let run_at = self.run_at.with_timezone(tz);
        (run_at > *now).then_some(run_at)
    }
}

// ============================================================================
// Interval
// ============================================================================

/// Fires every `interval`, measured from the time it is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTrigger {
    interval: Duration,
}

impl IntervalTrigger {
    /// Create a trigger firing every `seconds` seconds
    ///
    /// Zero is rejected, as is anything that does not fit a `chrono::Duration`.
    pub fn new(seconds: u64) -> Result<Self> {
        if seconds == 0 {
            return Err(SchedulerError::InvalidTrigger(
                "interval must be at least one second".to_string(),
            ));
        }
        let interval = i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                SchedulerError::InvalidTrigger(format!("interval of {seconds}s is out of range"))
            })?;
        Ok(Self { interval })
    }

    /// Create a trigger from a `std::time::Duration`
    pub fn every(interval: std::time::Duration) -> Result<Self> {
        let interval = Duration::from_std(interval)
            .map_err(|e| SchedulerError::InvalidTrigger(format!("interval out of range: {e}")))?;
        if interval <= Duration::zero() {
            return Err(SchedulerError::InvalidTrigger(
                "interval must be positive".to_string(),
            ));
        }
        Ok(Self { interval })
    }

    /// The configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Trigger for IntervalTrigger {
    fn next_run_time(&self, now: &DateTime<Tz>, tz: &Tz) -> Option<DateTime<Tz>> {
        now.checked_add_signed(self.interval)
            .map(|next| next.with_timezone(tz))
    }
}

// ============================================================================
// Daily
// ============================================================================

/// Fires every day at a fixed local time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTrigger {
    time: NaiveTime,
}

impl DailyTrigger {
    /// Create a trigger firing daily at `time` (sub-second part is dropped)
    pub fn new(time: NaiveTime) -> Self {
        Self {
            time: truncate_to_seconds(time),
        }
    }

    /// Create a trigger from hour, minute and second
    pub fn at(hour: u32, minute: u32, second: u32) -> Result<Self> {
        Ok(Self::new(time_of_day(hour, minute, second)?))
    }

    /// The configured time of day
    pub fn time(&self) -> NaiveTime {
        self.time
    }
}

impl Trigger for DailyTrigger {
    fn next_run_time(&self, now: &DateTime<Tz>, tz: &Tz) -> Option<DateTime<Tz>> {
        next_occurrence(now, tz, self.time, |_| true)
    }
}

// ============================================================================
// Cron-like (weekdays + time of day)
// ============================================================================

/// Fires on a set of weekdays at a fixed local time of day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronTrigger {
    days: HashSet<Weekday>,
    time: NaiveTime,
}

impl CronTrigger {
    /// Create a trigger firing on `days` at `time`
    ///
    /// An empty weekday set would never fire and is rejected.
    pub fn new(days: impl IntoIterator<Item = Weekday>, time: NaiveTime) -> Result<Self> {
        let days: HashSet<Weekday> = days.into_iter().collect();
        if days.is_empty() {
            return Err(SchedulerError::InvalidTrigger(
                "cron trigger needs at least one weekday".to_string(),
            ));
        }
        Ok(Self {
            days,
            time: truncate_to_seconds(time),
        })
    }

    /// Weekdays this trigger fires on
    pub fn days(&self) -> &HashSet<Weekday> {
        &self.days
    }

    /// The configured time of day
    pub fn time(&self) -> NaiveTime {
        self.time
    }
}

impl Trigger for CronTrigger {
    fn next_run_time(&self, now: &DateTime<Tz>, tz: &Tz) -> Option<DateTime<Tz>> {
        next_occurrence(now, tz, self.time, |date| self.days.contains(&date.weekday()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Build a time of day, rejecting out-of-range components
pub fn time_of_day(hour: u32, minute: u32, second: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| {
        SchedulerError::InvalidTrigger(format!(
            "invalid time of day {hour:02}:{minute:02}:{second:02}"
        ))
    })
}

fn truncate_to_seconds(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

/// First local `time` on a date accepted by `accept` that lies strictly after `now`
///
/// An occurrence equal to `now` counts as elapsed. Dates on which `time`
/// does not exist locally are passed over.
fn next_occurrence(
    now: &DateTime<Tz>,
    tz: &Tz,
    time: NaiveTime,
    accept: impl Fn(NaiveDate) -> bool,
) -> Option<DateTime<Tz>> {
    let local_now = now.with_timezone(tz);
    let mut date = local_now.date_naive();

    // Two weeks reach every weekday even if one calendar day was skipped.
    for _ in 0..15 {
        if accept(date) {
            let candidate = resolve_local(tz, date.and_time(time));
            if let Some(candidate) = candidate.filter(|c| *c > local_now) {
                return Some(candidate);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Map a local wall-clock time to an instant
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside
/// a spring-forward gap are pushed forward by one hour.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest().or_else(|| {
        let shifted = naive.checked_add_signed(Duration::hours(1))?;
        tz.from_local_datetime(&shifted).earliest()
    })
}
