//! Reminder parameters attached to instances and task nodes.
//!
//! A `RemindParam` combines a cadence (cron or a human-readable schedule),
//! a workday mask, and a daily time-of-day window. The due-time check lives
//! in `procflow-core::remind`; this module only holds the data.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Reminder cadence with workday and working-hours restrictions.
///
/// All times are interpreted in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemindParam {
    /// Cron expression (5 or 6 fields) or a schedule such as `"every day at 09:00"`.
    pub cron: String,
    /// ISO weekday numbers, 1 = Monday through 7 = Sunday. Empty means every day.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weeks: Vec<u8>,
    /// Daily window in which reminders may fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_time: Option<WorkTime>,
}

impl RemindParam {
    pub fn new(cron: impl Into<String>) -> Self {
        Self {
            cron: cron.into(),
            weeks: Vec::new(),
            work_time: None,
        }
    }

    pub fn with_weeks(mut self, weeks: impl IntoIterator<Item = u8>) -> Self {
        self.weeks = weeks.into_iter().collect();
        self
    }

    pub fn with_work_time(mut self, work_time: WorkTime) -> Self {
        self.work_time = Some(work_time);
        self
    }

    /// Whether `day` passes the workday mask.
    pub fn allows_weekday(&self, day: Weekday) -> bool {
        self.weeks.is_empty()
            || self
                .weeks
                .iter()
                .any(|d| u32::from(*d) == day.number_from_monday())
    }

    /// Whether `time` falls inside the work-time window (always true without one).
    pub fn allows_time(&self, time: NaiveTime) -> bool {
        self.work_time.as_ref().is_none_or(|w| w.contains(time))
    }
}

// ---------------------------------------------------------------------------
// WorkTime
// ---------------------------------------------------------------------------

/// Daily time-of-day window, written as `"HH:MM-HH:MM"`.
///
/// Both bounds are inclusive. A window whose end precedes its start wraps
/// past midnight (`"22:00-06:00"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkTime {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkTime {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

impl fmt::Display for WorkTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

impl FromStr for WorkTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid work time '{s}': expected HH:MM-HH:MM"))?;
        let parse = |part: &str| {
            NaiveTime::parse_from_str(part.trim(), "%H:%M")
                .map_err(|e| format!("invalid work time '{s}': {e}"))
        };
        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }
}

impl TryFrom<String> for WorkTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkTime> for String {
    fn from(value: WorkTime) -> Self {
        value.to_string()
    }
}
