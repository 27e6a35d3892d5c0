//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Fields: *, */N, N, comma lists; DOM and MON accept only *.
//! Day-of-week: 0-7 where 0 and 7 are both Sunday.
//! Examples: "* * * * *" = every minute, "0 18 * * 0" = Sundays at 18:00.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// Check an expression without computing anything. Used for startup-fatal
/// config validation.
pub fn validate(expression: &str) -> bool {
    parse(expression).is_some()
}

/// Compute the next run time strictly after `after`.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let spec = match parse(expression) {
        Some(s) => s,
        None => {
            tracing::warn!(
                "Invalid cron expression: '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
                expression
            );
            return None;
        }
    };

    let mut candidate = (after + Duration::minutes(1))
        .with_second(0)
        .and_then(|c| c.with_nanosecond(0))
        .unwrap_or(after);

    // Worst case a weekly schedule is 8 days out.
    for _ in 0..(8 * 24 * 60) {
        if spec.matches(candidate) {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}

struct CronSpec {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    weekdays: Vec<u32>, // days-from-Sunday, 0..=6
}

impl CronSpec {
    fn matches(&self, t: DateTime<Utc>) -> bool {
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.weekdays.contains(&t.weekday().num_days_from_sunday())
    }
}

fn parse(expression: &str) -> Option<CronSpec> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return None;
    }

    let minutes = parse_field(parts[0], 0, 59)?;
    let hours = parse_field(parts[1], 0, 23)?;
    // Day-of-month and month are wildcard-only in this parser.
    if parts[2] != "*" || parts[3] != "*" {
        return None;
    }
    // 7 is an alias for Sunday.
    let weekdays: Vec<u32> = parse_field(parts[4], 0, 7)?
        .into_iter()
        .map(|d| if d == 7 { 0 } else { d })
        .collect();

    Some(CronSpec {
        minutes,
        hours,
        weekdays,
    })
}

/// Parse a cron field into a list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma-separated: "0,15,30,45"
    if field.contains(',') {
        let vals: Result<Vec<u32>, _> = field.split(',').map(|s| s.trim().parse()).collect();
        return vals
            .ok()
            .map(|v| v.into_iter().filter(|x| *x >= min && *x <= max).collect());
    }

    // Single number
    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max { Some(vec![n]) } else { None }
}
