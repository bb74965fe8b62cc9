//! Five-field cron expressions (min hour dom mon dow) evaluated in a
//! configurable IANA timezone.
//!
//! Supports `*`, lists, ranges and steps; `7` is accepted as Sunday in the
//! day-of-week field. When both day-of-month and day-of-week are restricted,
//! standard cron semantics apply: the trigger fires when either matches.

use chrono::{DateTime, Datelike, Timelike};
use chrono_tz::Tz;

use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct CronExpr {
    minute: FieldSet,
    hour: FieldSet,
    dom: FieldSet,
    month: FieldSet,
    dow: FieldSet,
}

/// Allowed values for one cron field, as a bitmask over 0..=63.
#[derive(Clone, Copy, Debug)]
struct FieldSet {
    bits: u64,
    any: bool,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(Error::Config(format!(
                "cron expression '{expr}': expected 5 fields, got {}",
                parts.len()
            )));
        }

        Ok(Self {
            minute: FieldSet::parse(parts[0], 0, 59, false)?,
            hour: FieldSet::parse(parts[1], 0, 23, false)?,
            dom: FieldSet::parse(parts[2], 1, 31, false)?,
            month: FieldSet::parse(parts[3], 1, 12, false)?,
            dow: FieldSet::parse(parts[4], 0, 6, true)?,
        })
    }

    pub fn matches(&self, dt: DateTime<Tz>) -> bool {
        if !self.minute.contains(dt.minute())
            || !self.hour.contains(dt.hour())
            || !self.month.contains(dt.month())
        {
            return false;
        }

        let dom_ok = self.dom.contains(dt.day());
        let dow_ok = self.dow.contains(dt.weekday().num_days_from_sunday());
        match (self.dom.any, self.dow.any) {
            (true, true) => true,
            (true, false) => dow_ok,
            (false, true) => dom_ok,
            (false, false) => dom_ok || dow_ok,
        }
    }

    /// First matching minute boundary strictly after `now`.
    ///
    /// Capped at a bit over a year of minutes so impossible expressions
    /// (e.g. Feb 30) terminate with `None`.
    pub fn next_after(&self, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let mut t = (now + chrono::Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;

        for _ in 0..366 * 24 * 60 {
            if self.matches(t) {
                return Some(t);
            }
            t += chrono::Duration::minutes(1);
        }
        None
    }
}

impl FieldSet {
    fn parse(raw: &str, min: u32, max: u32, sunday_as_7: bool) -> Result<Self> {
        let full: u64 = ((1u64 << (max + 1)) - 1) & !((1u64 << min) - 1);
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self {
                bits: full,
                any: true,
            });
        }

        let mut bits = 0u64;
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            let part = part.trim();
            let (base, step) = match part.split_once('/') {
                Some((b, s)) => {
                    let step: u32 = s
                        .trim()
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid cron step: {s}")))?;
                    if step == 0 {
                        return Err(Error::Config("cron step must be > 0".to_string()));
                    }
                    (b.trim(), step)
                }
                None => (part, 1),
            };

            let (start, end) = if base == "*" {
                (min, max)
            } else if let Some((a, b)) = base.split_once('-') {
                (
                    parse_value(a, sunday_as_7)?,
                    parse_value(b, sunday_as_7)?,
                )
            } else {
                let v = parse_value(base, sunday_as_7)?;
                // A bare value with a step means "from v to max".
                if part.contains('/') {
                    (v, max)
                } else {
                    (v, v)
                }
            };

            let (start, end) = (start.max(min), end.min(max));
            if start > end {
                return Err(Error::Config(format!("invalid cron range: {part}")));
            }

            let mut v = start;
            while v <= end {
                bits |= 1 << v;
                v += step;
            }
        }

        Ok(Self {
            bits,
            any: bits & full == full,
        })
    }

    fn contains(&self, v: u32) -> bool {
        v < 64 && self.bits & (1 << v) != 0
    }
}

fn parse_value(s: &str, sunday_as_7: bool) -> Result<u32> {
    let v: u32 = s
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid cron value: {s}")))?;
    Ok(if sunday_as_7 && v == 7 { 0 } else { v })
}
