//! `pflow remind`: evaluate a reminder rule at an instant.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use console::style;

use procflow_core::remind::ReminderRule;
use procflow_types::remind::{RemindParam, WorkTime};

pub fn handle_remind(
    cron: &str,
    weeks: Vec<u8>,
    work_time: Option<&str>,
    at: Option<&str>,
    tolerance_secs: u64,
    json: bool,
) -> Result<()> {
    let mut param = RemindParam::new(cron).with_weeks(weeks);
    if let Some(raw) = work_time {
        let window: WorkTime = raw.parse().map_err(|e: String| anyhow!(e))?;
        param = param.with_work_time(window);
    }
    let at = match at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid --at '{raw}': expected RFC 3339"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let tolerance = chrono::Duration::from_std(std::time::Duration::from_secs(tolerance_secs))
        .context("Tolerance out of range")?;

    let rule = ReminderRule::compile(&param)?;
    let occurrence = rule.due_occurrence(at, tolerance);
    let next = rule.next_due(at);

    if json {
        let out = serde_json::json!({
            "reminder": param,
            "at": at.to_rfc3339(),
            "due": occurrence.is_some(),
            "occurrence": occurrence.map(|o| o.to_rfc3339()),
            "next_due": next.map(|n| n.to_rfc3339()),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    match occurrence {
        Some(occurrence) => println!(
            "  {} Due at {} (occurrence {})",
            style("✓").green(),
            style(at.to_rfc3339()).cyan(),
            occurrence.to_rfc3339()
        ),
        None => println!(
            "  {} Not due at {}",
            style("✗").red(),
            style(at.to_rfc3339()).cyan()
        ),
    }
    if !param.weeks.is_empty() {
        let days: Vec<String> = param.weeks.iter().map(u8::to_string).collect();
        println!("  Weekdays: {}", days.join(","));
    }
    if let Some(window) = rule.work_time() {
        println!("  Work time: {window}");
    }
    match next {
        Some(next) => println!("  Next due: {}", next.to_rfc3339()),
        None => println!("  Next due: {}", style("never").dim()),
    }
    println!();
    Ok(())
}
