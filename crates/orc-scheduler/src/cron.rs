//! Cron Union Trigger (C2) — 5-field cron matching plus the OR-over-list
//! semantics mandated by §4.2/§9: a union trigger re-checks every matching
//! minute rather than collapsing to a single cached next-fire time.

use chrono::{Datelike, NaiveDateTime, Timelike};

fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

fn cron_matches_naive(cron: &str, dt: &NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

fn validate_cron_field(field: &str, name: &str, min: u32, max: u32) -> Result<(), String> {
    if field == "*" {
        return Ok(());
    }
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step
            .parse()
            .map_err(|_| format!("{name}: invalid step '*/{step}' — expected a number"))?;
        if n == 0 || n > max {
            return Err(format!("{name}: step {n} out of range 1..={max}"));
        }
        return Ok(());
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            let start: u32 = start_s
                .parse()
                .map_err(|_| format!("{name}: invalid range start '{start_s}'"))?;
            let end: u32 = end_s
                .parse()
                .map_err(|_| format!("{name}: invalid range end '{end_s}'"))?;
            if start < min || start > max || end < min || end > max {
                return Err(format!("{name}: range {start}-{end} out of bounds {min}..={max}"));
            }
            if start > end {
                return Err(format!("{name}: range start {start} > end {end}"));
            }
        } else {
            let n: u32 = part.parse().map_err(|_| format!("{name}: invalid value '{part}'"))?;
            if n < min || n > max {
                return Err(format!("{name}: value {n} out of range {min}..={max}"));
            }
        }
    }
    Ok(())
}

/// Validates a 5-field cron expression (minute hour dom month dow).
pub fn validate_cron(cron: &str) -> Result<(), String> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields (minute hour dom month dow), got {}", fields.len()));
    }
    let names = ["minute", "hour", "day-of-month", "month", "day-of-week"];
    let ranges: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];
    for (i, field) in fields.iter().enumerate() {
        validate_cron_field(field, names[i], ranges[i].0, ranges[i].1)?;
    }
    Ok(())
}

/// An OR over a list of cron expressions, evaluated against naive wall-clock
/// readings already resolved into the scheduler zone `S`. Invalid expressions
/// are dropped at construction time and logged; a list with none valid
/// degrades to an always-empty union.
#[derive(Debug, Clone)]
pub struct CronUnionTrigger {
    valid: Vec<String>,
}

impl CronUnionTrigger {
    pub fn new(cron_list: &[String]) -> Self {
        let mut valid = Vec::with_capacity(cron_list.len());
        for expr in cron_list {
            match validate_cron(expr) {
                Ok(()) => valid.push(expr.clone()),
                Err(reason) => {
                    tracing::warn!(expr, reason, "skipping invalid cron expression");
                }
            }
        }
        Self { valid }
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }

    /// True if any member expression matches `dt` (minute granularity; any
    /// seconds/nanos on `dt` are ignored by the field comparison).
    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.valid.iter().any(|c| cron_matches_naive(c, dt))
    }

    /// Earliest minute strictly after `after` that satisfies any member
    /// expression. `None` if the union is empty or nothing matches within a
    /// year.
    pub fn next_fire(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.valid.is_empty() {
            return None;
        }
        let mut candidate = after
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(after)
            + chrono::Duration::minutes(1);

        const MAX_CHECKS: usize = 366 * 24 * 60;
        for _ in 0..MAX_CHECKS {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, 0).unwrap()
    }

    #[test]
    fn validate_cron_accepts_valid() {
        assert!(validate_cron("0 * * * *").is_ok());
        assert!(validate_cron("*/5 9-17 * * 1-5").is_ok());
    }

    #[test]
    fn validate_cron_rejects_invalid() {
        assert!(validate_cron("* * *").is_err());
        assert!(validate_cron("60 * * * *").is_err());
        assert!(validate_cron("* 24 * * *").is_err());
        assert!(validate_cron("*/0 * * * *").is_err());
    }

    #[test]
    fn union_drops_invalid_and_logs() {
        let trigger = CronUnionTrigger::new(&["not a cron".into(), "0 * * * *".into()]);
        assert!(!trigger.is_empty());
        assert!(trigger.matches(&t(2026, 7, 28, 9, 0)));
    }

    #[test]
    fn union_with_no_valid_expressions_is_empty() {
        let trigger = CronUnionTrigger::new(&["garbage".into()]);
        assert!(trigger.is_empty());
        assert_eq!(trigger.next_fire(t(2026, 7, 28, 9, 0)), None);
    }

    #[test]
    fn next_fire_takes_minimum_across_members() {
        let trigger = CronUnionTrigger::new(&["0 10 * * *".into(), "30 10 * * *".into()]);
        let next = trigger.next_fire(t(2026, 7, 28, 9, 0)).unwrap();
        assert_eq!(next, t(2026, 7, 28, 10, 0));
    }

    #[test]
    fn p7_every_5_minutes_of_hour_10_weekdays() {
        let trigger = CronUnionTrigger::new(&["*/5 10 * * 1-5".into()]);
        // 2026-07-28 is a Tuesday.
        assert!(trigger.matches(&t(2026, 7, 28, 10, 25)));
        assert!(!trigger.matches(&t(2026, 7, 28, 10, 26)));
        assert!(!trigger.matches(&t(2026, 7, 28, 11, 0)));
    }

    #[test]
    fn matches_ignores_seconds() {
        let trigger = CronUnionTrigger::new(&["30 9 * * *".into()]);
        let with_seconds = t(2026, 7, 28, 9, 30).with_second(45).unwrap();
        assert!(trigger.matches(&with_seconds));
    }
}
