//! Clock & Time Model (C1).
//!
//! The system anchors on one **local zone** `L` (where persisted timestamps
//! live, always naive) and one **scheduler zone** `S` (where cron fields are
//! evaluated). `S` is either UTC or `L` itself, fixed once at startup from
//! `USE_TZ`. All conversions between naive-local and scheduler-aware times
//! route through a [`Clock`] — the OS default zone is never consulted.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A signed time-offset unit, as used by `execute_shift_unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "min")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "D")]
    Days,
}

impl TimeUnit {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        match raw {
            "s" => Ok(Self::Seconds),
            "min" => Ok(Self::Minutes),
            "h" => Ok(Self::Hours),
            "D" => Ok(Self::Days),
            other => Err(Error::BadUnit(other.to_string())),
        }
    }

    fn to_duration(self, n: i64) -> Duration {
        match self {
            Self::Seconds => Duration::seconds(n),
            Self::Minutes => Duration::minutes(n),
            Self::Hours => Duration::hours(n),
            Self::Days => Duration::days(n),
        }
    }
}

/// Resolve a naive local datetime against `tz`, picking a deterministic
/// instant across DST gaps and overlaps: the earliest valid mapping on an
/// ambiguous (fall-back) wall-clock time, and the first valid instant after
/// a spring-forward gap.
fn localize(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _latest) => earliest,
        LocalResult::None => {
            // Spring-forward gap: walk forward a minute at a time until the
            // wall clock resolves to a real instant.
            let mut candidate = naive;
            loop {
                candidate += Duration::minutes(1);
                if let LocalResult::Single(dt) = tz.from_local_datetime(&candidate) {
                    return dt;
                }
            }
        }
    }
}

/// Anchors `now_local()` and cron evaluation on the configured local /
/// scheduler zones.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    local: Tz,
    scheduler: Tz,
}

impl Clock {
    /// `use_tz`: selects the scheduler zone — UTC when true, else `local`.
    pub fn new(local: Tz, use_tz: bool) -> Self {
        let scheduler = if use_tz { chrono_tz::UTC } else { local };
        Self { local, scheduler }
    }

    pub fn local_zone(&self) -> Tz {
        self.local
    }

    pub fn scheduler_zone(&self) -> Tz {
        self.scheduler
    }

    /// Naive local wall-clock "now", used for all persisted timestamps.
    pub fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.local).naive_local()
    }

    /// Converts a naive-local timestamp into an `S`-aware one.
    pub fn to_scheduler(&self, naive_local: NaiveDateTime) -> DateTime<Tz> {
        localize(&self.local, naive_local).with_timezone(&self.scheduler)
    }

    /// Converts an `S`-aware timestamp back to naive local.
    pub fn from_scheduler(&self, aware: DateTime<Tz>) -> NaiveDateTime {
        aware.with_timezone(&self.local).naive_local()
    }

    /// Resolves a naive wall-clock reading taken in `S` back to naive local.
    /// Used by the cron union trigger, which matches fields against `S`'s
    /// naive representation directly rather than carrying a `DateTime<Tz>`.
    pub fn from_scheduler_naive(&self, scheduler_naive: NaiveDateTime) -> NaiveDateTime {
        localize(&self.scheduler, scheduler_naive)
            .with_timezone(&self.local)
            .naive_local()
    }

    /// Resolves a naive local reading into `S`'s naive wall-clock representation.
    pub fn to_scheduler_naive(&self, naive_local: NaiveDateTime) -> NaiveDateTime {
        self.to_scheduler(naive_local).naive_local()
    }

    /// Adds `±n` of unit `u` to a naive local timestamp.
    pub fn shift(&self, t: NaiveDateTime, n: i64, u: TimeUnit) -> NaiveDateTime {
        t + u.to_duration(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ymd_hms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn parse_units() {
        assert_eq!(TimeUnit::parse("s").unwrap(), TimeUnit::Seconds);
        assert_eq!(TimeUnit::parse("min").unwrap(), TimeUnit::Minutes);
        assert_eq!(TimeUnit::parse("h").unwrap(), TimeUnit::Hours);
        assert_eq!(TimeUnit::parse("D").unwrap(), TimeUnit::Days);
        assert!(TimeUnit::parse("bogus").is_err());
    }

    #[test]
    fn shift_adds_and_subtracts() {
        let clock = Clock::new(chrono_tz::Asia::Shanghai, false);
        let t = ymd_hms(2026, 1, 1, 10, 0, 0);
        let fwd = clock.shift(t, 30, TimeUnit::Seconds);
        assert_eq!(fwd, ymd_hms(2026, 1, 1, 10, 0, 30));
        let back = clock.shift(t, -30, TimeUnit::Seconds);
        assert_eq!(back, ymd_hms(2026, 1, 1, 9, 59, 30));
    }

    #[test]
    fn scheduler_zone_is_utc_when_use_tz() {
        let clock = Clock::new(chrono_tz::Asia::Shanghai, true);
        assert_eq!(clock.scheduler_zone(), chrono_tz::UTC);
        let clock = Clock::new(chrono_tz::Asia::Shanghai, false);
        assert_eq!(clock.scheduler_zone(), chrono_tz::Asia::Shanghai);
    }

    #[test]
    fn to_scheduler_round_trips_through_local() {
        let clock = Clock::new(chrono_tz::Asia::Shanghai, true);
        let naive = ymd_hms(2026, 6, 1, 9, 30, 0);
        let aware = clock.to_scheduler(naive);
        // Shanghai is UTC+8 with no DST, so 09:30 local is 01:30 UTC.
        assert_eq!(aware.naive_local(), ymd_hms(2026, 6, 1, 1, 30, 0));
        assert_eq!(clock.from_scheduler(aware), naive);
    }

    #[test]
    fn scheduler_naive_round_trips_when_no_dst() {
        let clock = Clock::new(chrono_tz::Asia::Shanghai, false);
        let naive = ymd_hms(2026, 6, 1, 9, 30, 0);
        let scheduler_naive = clock.to_scheduler_naive(naive);
        assert_eq!(scheduler_naive, naive);
        assert_eq!(clock.from_scheduler_naive(scheduler_naive), naive);
    }

    #[test]
    fn dst_gap_resolves_forward() {
        // US spring-forward: 2026-03-08 02:30 local does not exist in New_York.
        let clock = Clock::new(chrono_tz::America::New_York, false);
        let gap = ymd_hms(2026, 3, 8, 2, 30, 0);
        let resolved = clock.to_scheduler(gap);
        assert!(resolved.naive_local() >= ymd_hms(2026, 3, 8, 3, 0, 0));
    }
}
