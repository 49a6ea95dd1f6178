//! Scheduler configuration
//!
//! Loaded from JSON or built in code. Durations are written as strings,
//! e.g. `"250ms"` or `"30s"`:
//!
//! ```json
//! {
//!   "tickInterval": "100ms",
//!   "timezone": "Asia/Kolkata",
//!   "maxGraceTime": "60s"
//! }
//! ```

use crate::error::{Result, SchedulerError};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Delay between two evaluations of due jobs (default: 100ms)
    #[serde(default = "default_tick_interval", with = "duration_serde")]
    pub tick_interval: Duration,

    /// IANA time zone name; `None` uses the system zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Maximum lateness after which a due job is skipped; `None` never skips
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_serde"
    )]
    pub max_grace_time: Option<Duration>,
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            timezone: None,
            max_grace_time: None,
        }
    }
}

impl SchedulerConfig {
    /// Load and validate a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let cfg: SchedulerConfig = serde_json::from_str(&src).map_err(|e| {
            SchedulerError::Config(format!("parse error in {}: {e}", path.display()))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Set the tick interval
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Set the time zone by IANA name
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Set the grace window
    pub fn with_max_grace_time(mut self, max_grace_time: Duration) -> Self {
        self.max_grace_time = Some(max_grace_time);
        self
    }

    /// Check the configuration for values the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(SchedulerError::Config(
                "tick interval must be greater than zero".to_string(),
            ));
        }
        if let Some(grace) = self.max_grace_time {
            chrono::Duration::from_std(grace).map_err(|e| {
                SchedulerError::Config(format!("max grace time out of range: {e}"))
            })?;
        }
        self.resolve_timezone()?;
        Ok(())
    }

    /// Resolve the configured time zone
    ///
    /// Without an explicit zone the system zone is used, falling back to
    /// UTC when it cannot be determined.
    pub fn resolve_timezone(&self) -> Result<Tz> {
        match &self.timezone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| SchedulerError::InvalidTimezone(name.clone())),
            None => Ok(system_timezone()),
        }
    }
}

fn system_timezone() -> Tz {
    match iana_time_zone::get_timezone() {
        Ok(name) => name.parse().unwrap_or_else(|_| {
            tracing::warn!(timezone = %name, "Unknown system time zone, using UTC");
            Tz::UTC
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot determine system time zone, using UTC");
            Tz::UTC
        }
    }
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn format_duration(d: Duration) -> String {
        if d.subsec_nanos() == 0 {
            format!("{}s", d.as_secs())
        } else {
            format!("{}ms", d.as_millis())
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        if let Some(v) = s.strip_suffix("ms") {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string());
        }
        if let Some(v) = s.strip_suffix('s') {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string());
        }
        Err(format!("unknown duration format: '{s}' (use '30s' or '500ms')"))
    }
}

mod option_duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::duration_serde::{format_duration, parse_duration};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
