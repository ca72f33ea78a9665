//! Minimal five-field cron expressions (`minute hour day-of-month month day-of-week`).
//!
//! Supports `*`, single values, ranges `a-b`, steps `*/n` and `a-b/n`, and
//! comma-separated lists. Day-of-week accepts 0-7 with both 0 and 7 meaning
//! Sunday. When both day fields are restricted a day matches if either does,
//! as in classic cron. Evaluation is in UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

/// Cron parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cron expression `{expr}`: {reason}")]
pub struct CronParseError {
    expr: String,
    reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    wildcard: bool,
}

impl Field {
    const fn contains(self, v: u32) -> bool {
        v < 64 && self.bits & (1 << v) != 0
    }
}

fn parse_field(raw: &str, min: u32, max: u32) -> Result<Field, String> {
    let mut bits = 0u64;
    let wildcard = raw == "*";
    for part in raw.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| format!("bad step `{s}`"))?;
                if step == 0 {
                    return Err("step must be positive".into());
                }
                (r, step)
            }
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a: u32 = a.parse().map_err(|_| format!("bad value `{a}`"))?;
            let b: u32 = b.parse().map_err(|_| format!("bad value `{b}`"))?;
            (a, b)
        } else {
            let v: u32 = range.parse().map_err(|_| format!("bad value `{range}`"))?;
            // `5/15` means 5, 20, 35, ... up to max
            if step > 1 {
                (v, max)
            } else {
                (v, v)
            }
        };
        if lo < min || hi > max || lo > hi {
            return Err(format!("`{part}` outside {min}-{max}"));
        }
        let mut v = lo;
        while v <= hi {
            bits |= 1 << v;
            v += step;
        }
    }
    Ok(Field { bits, wildcard })
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpr {
    /// Parse a five-field expression.
    ///
    /// # Errors
    ///
    /// Returns [`CronParseError`] on a wrong field count or out-of-range value.
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let err = |reason: String| CronParseError {
            expr: expr.to_string(),
            reason,
        };
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(err(format!("expected 5 fields, got {}", fields.len())));
        };
        let mut day_of_week = parse_field(dow, 0, 7).map_err(err)?;
        if day_of_week.contains(7) {
            day_of_week.bits |= 1;
        }
        Ok(Self {
            source: expr.split_whitespace().collect::<Vec<_>>().join(" "),
            minute: parse_field(minute, 0, 59).map_err(err)?,
            hour: parse_field(hour, 0, 23).map_err(err)?,
            day_of_month: parse_field(dom, 1, 31).map_err(err)?,
            month: parse_field(month, 1, 12).map_err(err)?,
            day_of_week,
        })
    }

    fn day_matches(&self, at: DateTime<Utc>) -> bool {
        let dom = self.day_of_month.contains(at.day());
        let dow = self.day_of_week.contains(at.weekday().num_days_from_sunday());
        match (self.day_of_month.wildcard, self.day_of_week.wildcard) {
            (true, true) => true,
            (false, true) => dom,
            (true, false) => dow,
            (false, false) => dom || dow,
        }
    }

    /// First matching minute strictly after `after`, or `None` if the
    /// expression never fires (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let mut t = start;
        // five years of day-level skips is more than any valid expression needs
        let horizon = start + Duration::days(366 * 5);
        while t < horizon {
            if !self.month.contains(t.month()) {
                let (y, m) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(t) {
                t = Utc
                    .with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
                    .single()?
                    + Duration::days(1);
                continue;
            }
            if !self.hour.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}

impl FromStr for CronExpr {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
