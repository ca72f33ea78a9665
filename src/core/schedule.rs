//! Schedule interval classes and next-run computation.

pub mod cron;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub use cron::{CronExpr, CronParseError};

/// How often a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleInterval {
    /// Every day at `publish_hour`.
    Daily,
    /// Every `n` days at `publish_hour`, counted from the last evaluation.
    EveryNDays(u32),
    /// Mondays at `publish_hour`.
    Weekly,
    /// The 1st and 15th of each month at `publish_hour`.
    Biweekly,
    /// Free-form five-field cron expression; `publish_hour` is ignored.
    Cron(String),
}

impl ScheduleInterval {
    /// Next run strictly after `now`.
    ///
    /// Always computed from `now`, never from a previous `next_run_at`, so a
    /// scheduler that was down for a while fires once and catches up.
    /// Returns `None` only for a cron expression that cannot be parsed or
    /// never fires.
    pub fn next_run_after(&self, now: DateTime<Utc>, publish_hour: u32) -> Option<DateTime<Utc>> {
        let hour = publish_hour.min(23);
        let today = now.date_naive();
        match self {
            Self::Daily => next_matching_day(now, hour, |_| true),
            Self::EveryNDays(n) => {
                let candidate = at_hour(today, hour)?;
                if candidate > now {
                    Some(candidate)
                } else {
                    Some(candidate + Duration::days(i64::from((*n).max(1))))
                }
            }
            Self::Weekly => next_matching_day(now, hour, |d| d.weekday() == Weekday::Mon),
            Self::Biweekly => next_matching_day(now, hour, |d| d.day() == 1 || d.day() == 15),
            Self::Cron(expr) => CronExpr::parse(expr).ok()?.next_after(now),
        }
    }

    /// Equivalent cron expression for display and export.
    pub fn cron_expression(&self, publish_hour: u32) -> String {
        match self {
            Self::Daily => format!("0 {publish_hour} * * *"),
            Self::EveryNDays(n) => format!("0 {publish_hour} */{n} * *"),
            Self::Weekly => format!("0 {publish_hour} * * 1"),
            Self::Biweekly => format!("0 {publish_hour} 1,15 * *"),
            Self::Cron(expr) => expr.clone(),
        }
    }

    /// Validate the interval (cron syntax, positive day count).
    ///
    /// # Errors
    ///
    /// Returns a message describing the problem.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::EveryNDays(0) => Err("every_n_days requires n >= 1".into()),
            Self::Cron(expr) => CronExpr::parse(expr).map(|_| ()).map_err(|e| e.to_string()),
            _ => Ok(()),
        }
    }
}

fn at_hour(day: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    let naive = day.and_hms_opt(hour, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

fn next_matching_day(
    now: DateTime<Utc>,
    hour: u32,
    matches: impl Fn(NaiveDate) -> bool,
) -> Option<DateTime<Utc>> {
    let mut day = now.date_naive();
    // the sparsest class (1st/15th) matches within 17 days
    for _ in 0..40 {
        if matches(day) {
            let candidate = at_hour(day, hour)?;
            if candidate > now {
                return Some(candidate);
            }
        }
        day = day.succ_opt()?;
    }
    None
}

impl FromStr for ScheduleInterval {
    type Err = String;

    /// Accepts `daily`, `weekly`, `biweekly`, `every_3_days`,
    /// `every_<n>_days`, or a cron expression.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "daily" => return Ok(Self::Daily),
            "weekly" => return Ok(Self::Weekly),
            "biweekly" => return Ok(Self::Biweekly),
            other => {
                if let Some(n) = other
                    .strip_prefix("every_")
                    .and_then(|rest| rest.strip_suffix("_days"))
                {
                    let n: u32 = n.parse().map_err(|_| format!("bad day count in `{s}`"))?;
                    let interval = Self::EveryNDays(n);
                    interval.validate()?;
                    return Ok(interval);
                }
            }
        }
        let interval = Self::Cron(s.to_string());
        interval.validate()?;
        Ok(interval)
    }
}

impl fmt::Display for ScheduleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => f.write_str("daily"),
            Self::EveryNDays(n) => write!(f, "every_{n}_days"),
            Self::Weekly => f.write_str("weekly"),
            Self::Biweekly => f.write_str("biweekly"),
            Self::Cron(expr) => f.write_str(expr),
        }
    }
}
