use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Daily local-time window during which forwarding is permitted.
///
/// `Hours { start: 22, end: 8 }` wraps midnight: open during [22,24) and [0,8).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedWindow {
    Always,
    Hours { start: u32, end: u32 },
}

impl AllowedWindow {
    /// Whether forwarding may proceed at `now`, judged in local time for `tz`.
    pub fn is_open_at(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        match *self {
            AllowedWindow::Always => true,
            AllowedWindow::Hours { start, end } => {
                let hour = now.with_timezone(&tz).hour();
                if start < end {
                    start <= hour && hour < end
                } else {
                    // Window spans midnight.
                    hour >= start || hour < end
                }
            }
        }
    }

    /// Hours must sit in 0..=24; a zero-length window is rejected.
    pub fn validate(&self) -> crate::Result<()> {
        if let AllowedWindow::Hours { start, end } = *self {
            if start > 24 || end > 24 {
                return Err(crate::Error::Config(format!(
                    "window hours out of range: {start}-{end}"
                )));
            }
            if start == end {
                return Err(crate::Error::Config(
                    "window start and end hours are equal; use 'always' instead".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn at_hour_utc(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, hour, 30, 0).unwrap()
    }

    #[test]
    fn always_is_always_open() {
        for h in 0..24 {
            assert!(AllowedWindow::Always.is_open_at(at_hour_utc(h), Tz::UTC));
        }
    }

    #[test]
    fn plain_window_half_open() {
        let w = AllowedWindow::Hours { start: 8, end: 22 };
        assert!(!w.is_open_at(at_hour_utc(7), Tz::UTC));
        assert!(w.is_open_at(at_hour_utc(8), Tz::UTC));
        assert!(w.is_open_at(at_hour_utc(21), Tz::UTC));
        assert!(!w.is_open_at(at_hour_utc(22), Tz::UTC));
        assert!(!w.is_open_at(at_hour_utc(23), Tz::UTC));
    }

    #[test]
    fn wraparound_window_spans_midnight() {
        let w = AllowedWindow::Hours { start: 22, end: 8 };
        for h in 0..24 {
            let expect = h >= 22 || h < 8;
            assert_eq!(w.is_open_at(at_hour_utc(h), Tz::UTC), expect, "hour {h}");
        }
    }

    #[test]
    fn window_respects_timezone() {
        // 06:30 UTC is 10:00 in Tehran (UTC+3:30).
        let w = AllowedWindow::Hours { start: 8, end: 22 };
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 6, 30, 0).unwrap();
        let tehran: Tz = "Asia/Tehran".parse().unwrap();
        assert!(!w.is_open_at(now, Tz::UTC));
        assert!(w.is_open_at(now, tehran));
    }

    #[test]
    fn validation_rejects_bad_hours() {
        assert!(AllowedWindow::Hours { start: 25, end: 8 }.validate().is_err());
        assert!(AllowedWindow::Hours { start: 8, end: 8 }.validate().is_err());
        assert!(AllowedWindow::Hours { start: 22, end: 8 }.validate().is_ok());
        assert!(AllowedWindow::Always.validate().is_ok());
    }
}
