//! Reminder due-time evaluation.
//!
//! Provides:
//! - Cadence normalization (5/6-field cron or human-readable, e.g. "every day at 09:00")
//! - `ReminderRule`, a compiled `RemindParam` that answers "is a reminder due now?"
//!
//! A reminder is due at `now` when the cadence has an occurrence in
//! `(now - tolerance, now]`, the weekday of `now` is in the workday mask, and
//! the time of day of `now` is inside the work-time window. All evaluation
//! happens in UTC.

use chrono::{DateTime, Datelike, Duration, Utc};
use procflow_types::remind::{RemindParam, WorkTime};

use crate::error::EngineError;

/// Upper bound on cadence occurrences inspected by [`ReminderRule::next_due`].
const MAX_NEXT_DUE_SCAN: usize = 10_000;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while compiling a reminder cadence.
#[derive(Debug, thiserror::Error)]
pub enum RemindError {
    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Workday mask entries must be ISO weekday numbers.
    #[error("invalid weekday {0}: expected 1 (Monday) through 7 (Sunday)")]
    InvalidWeekday(u8),
}

impl From<RemindError> for EngineError {
    fn from(e: RemindError) -> Self {
        EngineError::Configuration(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a cadence string to a 6-field cron expression.
///
/// Supported patterns (case-insensitive):
/// - "every N minutes"     -> "0 */N * * * *"
/// - "every N hours"       -> "0 0 */N * * *"
/// - "every minute"        -> "0 * * * * *"
/// - "every hour"          -> "0 0 * * * *"
/// - "every day" / "daily" -> "0 0 0 * * *"
/// - "every day at HH:MM"  -> "0 MM HH * * *"
/// - "every weekday at HH:MM" -> "0 MM HH * * MON-FRI"
///
/// Standard 5-field cron gets a seconds field prepended; 6-field cron is
/// returned as-is.
pub fn normalize_schedule(input: &str) -> Result<String, RemindError> {
    let trimmed = input.trim();

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() == 5 && !trimmed.to_lowercase().starts_with("every") {
        return Ok(format!("0 {trimmed}"));
    }
    if parts.len() == 6 && !trimmed.to_lowercase().starts_with("every") {
        return Ok(trimmed.to_string());
    }

    let lower = trimmed.to_lowercase();

    if lower == "every minute" || lower == "minutely" {
        return Ok("0 * * * * *".to_string());
    }
    if lower == "every hour" || lower == "hourly" {
        return Ok("0 0 * * * *".to_string());
    }
    if lower == "every day" || lower == "daily" {
        return Ok("0 0 0 * * *".to_string());
    }

    if let Some(rest) = lower.strip_prefix("every ") {
        if let Some(at_part) = rest.strip_prefix("day at ") {
            let (hour, minute) = parse_hh_mm(at_part, input)?;
            return Ok(format!("0 {minute} {hour} * * *"));
        }
        if let Some(at_part) = rest.strip_prefix("weekday at ") {
            let (hour, minute) = parse_hh_mm(at_part, input)?;
            return Ok(format!("0 {minute} {hour} * * MON-FRI"));
        }

        let words: Vec<&str> = rest.split_whitespace().collect();
        if words.len() == 2 {
            let n: u32 = words[0]
                .parse()
                .map_err(|_| RemindError::InvalidSchedule(input.to_string()))?;
            if n == 0 {
                return Err(RemindError::InvalidSchedule(
                    "interval must be > 0".to_string(),
                ));
            }
            let unit = words[1].trim_end_matches('s');
            return match unit {
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(RemindError::InvalidSchedule(input.to_string())),
            };
        }
    }

    Err(RemindError::InvalidSchedule(format!(
        "unrecognized schedule format: '{trimmed}'"
    )))
}

fn parse_hh_mm(value: &str, input: &str) -> Result<(u32, u32), RemindError> {
    let invalid = || RemindError::InvalidSchedule(input.to_string());
    let (h, m) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = m.trim().parse().map_err(|_| invalid())?;
    if hour < 24 && minute < 60 {
        Ok((hour, minute))
    } else {
        Err(invalid())
    }
}

// ---------------------------------------------------------------------------
// ReminderRule
// ---------------------------------------------------------------------------

/// A `RemindParam` with its cadence parsed.
#[derive(Debug, Clone)]
pub struct ReminderRule {
    cron: croner::Cron,
    param: RemindParam,
}

impl ReminderRule {
    /// Parse the cadence and check the workday mask.
    pub fn compile(param: &RemindParam) -> Result<Self, RemindError> {
        if let Some(bad) = param.weeks.iter().find(|d| !(1..=7).contains(*d)) {
            return Err(RemindError::InvalidWeekday(*bad));
        }
        let cron_expr = normalize_schedule(&param.cron)?;
        let cron = cron_expr
            .parse::<croner::Cron>()
            .map_err(|e| RemindError::InvalidSchedule(format!("'{}': {e}", param.cron)))?;
        Ok(Self {
            cron,
            param: param.clone(),
        })
    }

    pub fn param(&self) -> &RemindParam {
        &self.param
    }

    pub fn work_time(&self) -> Option<&WorkTime> {
        self.param.work_time.as_ref()
    }

    /// The cadence occurrence that makes a reminder due at `now`, if any.
    pub fn due_occurrence(&self, now: DateTime<Utc>, tolerance: Duration) -> Option<DateTime<Utc>> {
        if !self.param.allows_weekday(now.weekday()) || !self.param.allows_time(now.time()) {
            return None;
        }
        let window_start = now - tolerance;
        self.cron
            .iter_after(window_start)
            .next()
            .filter(|occurrence| *occurrence <= now)
    }

    /// Whether a reminder is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>, tolerance: Duration) -> bool {
        self.due_occurrence(now, tolerance).is_some()
    }

    /// First occurrence after `after` that passes the workday and work-time filters.
    pub fn next_due(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron
            .iter_after(after)
            .take(MAX_NEXT_DUE_SCAN)
            .find(|t| self.param.allows_weekday(t.weekday()) && self.param.allows_time(t.time()))
    }
}

/// Convenience for one-off checks: compile `param` and test it at `now`.
pub fn is_due(
    param: &RemindParam,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<bool, RemindError> {
    Ok(ReminderRule::compile(param)?.is_due(now, tolerance))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn workday_nine() -> RemindParam {
        RemindParam::new("0 9 * * *")
            .with_weeks([1, 2, 3, 4, 5])
            .with_work_time("08:00-18:00".parse().unwrap())
    }

    // -------------------------------------------------------------------
    // normalize_schedule
    // -------------------------------------------------------------------

    #[test]
    fn test_normalize_standard_5field_cron() {
        assert_eq!(normalize_schedule("*/5 * * * *").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_normalize_6field_cron_passthrough() {
        assert_eq!(normalize_schedule("30 */5 * * * *").unwrap(), "30 */5 * * * *");
    }

    #[test]
    fn test_normalize_human_forms() {
        assert_eq!(normalize_schedule("every 15 minutes").unwrap(), "0 */15 * * * *");
        assert_eq!(normalize_schedule("every 2 hours").unwrap(), "0 0 */2 * * *");
        assert_eq!(normalize_schedule("Hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_schedule("daily").unwrap(), "0 0 0 * * *");
        assert_eq!(normalize_schedule("every day at 09:30").unwrap(), "0 30 9 * * *");
        assert_eq!(
            normalize_schedule("every weekday at 17:00").unwrap(),
            "0 0 17 * * MON-FRI"
        );
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        assert!(normalize_schedule("every 0 minutes").is_err());
        assert!(normalize_schedule("every day at 25:00").is_err());
        assert!(normalize_schedule("every fortnight").is_err());
        assert!(normalize_schedule("whenever").is_err());
    }

    // -------------------------------------------------------------------
    // Due checks
    // -------------------------------------------------------------------

    #[test]
    fn test_due_on_tuesday_at_nine() {
        // 2024-01-02 is a Tuesday
        let rule = ReminderRule::compile(&workday_nine()).unwrap();
        assert!(rule.is_due(at(2024, 1, 2, 9, 0), Duration::seconds(60)));
    }

    #[test]
    fn test_not_due_on_saturday_at_nine() {
        // 2024-01-06 is a Saturday
        let rule = ReminderRule::compile(&workday_nine()).unwrap();
        assert!(!rule.is_due(at(2024, 1, 6, 9, 0), Duration::seconds(60)));
    }

    #[test]
    fn test_due_within_tolerance_only() {
        let rule = ReminderRule::compile(&workday_nine()).unwrap();
        let tolerance = Duration::seconds(60);
        assert!(rule.is_due(at(2024, 1, 2, 9, 0) + Duration::seconds(30), tolerance));
        assert!(!rule.is_due(at(2024, 1, 2, 9, 2), tolerance));
        assert!(!rule.is_due(at(2024, 1, 2, 8, 59), tolerance));
    }

    #[test]
    fn test_outside_work_time_not_due() {
        let param = RemindParam::new("every hour")
            .with_work_time("08:00-18:00".parse().unwrap());
        let rule = ReminderRule::compile(&param).unwrap();
        assert!(rule.is_due(at(2024, 1, 2, 12, 0), Duration::seconds(60)));
        assert!(!rule.is_due(at(2024, 1, 2, 20, 0), Duration::seconds(60)));
    }

    #[test]
    fn test_due_occurrence_reports_cadence_time() {
        let rule = ReminderRule::compile(&workday_nine()).unwrap();
        let now = at(2024, 1, 2, 9, 0) + Duration::seconds(45);
        assert_eq!(
            rule.due_occurrence(now, Duration::seconds(60)),
            Some(at(2024, 1, 2, 9, 0))
        );
    }

    #[test]
    fn test_next_due_skips_weekend() {
        let rule = ReminderRule::compile(&workday_nine()).unwrap();
        // Friday 2024-01-05 after 09:00 -> next is Monday 2024-01-08 09:00
        let next = rule.next_due(at(2024, 1, 5, 10, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 8, 9, 0));
    }

    #[test]
    fn test_compile_rejects_bad_weekday() {
        let param = RemindParam::new("daily").with_weeks([0]);
        assert!(matches!(
            ReminderRule::compile(&param),
            Err(RemindError::InvalidWeekday(0))
        ));
    }

    #[test]
    fn test_is_due_convenience() {
        assert!(is_due(&workday_nine(), at(2024, 1, 2, 9, 0), Duration::seconds(60)).unwrap());
        assert!(is_due(&RemindParam::new("nonsense"), Utc::now(), Duration::seconds(60)).is_err());
    }
}
